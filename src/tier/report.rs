use std::fmt;

use crate::order::Order;

/// 一つの次数に関する統計値.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStat {
    /// 次数.
    pub order: Order,

    /// 未解放のグルーピング数.
    pub count: usize,

    /// 未解放のグルーピングが保持するunit数(`count << order`).
    pub units: usize,
}

/// `TierTable`のある時点での値.
///
/// `Display`の出力は以下の形式となる:
///
/// ```text
/// ORDER:        0        1        2        3
/// COUNT:        1        0        1        1
/// TOTAL: 13
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierReport {
    max_order: Order,
    counts: Vec<usize>,
}
impl TierReport {
    pub(crate) fn new(max_order: Order, counts: Vec<usize>) -> Self {
        TierReport { max_order, counts }
    }

    /// 指定次数の未解放グルーピング数を返す.
    pub fn count(&self, order: Order) -> usize {
        self.counts.get(order.as_usize()).cloned().unwrap_or(0)
    }

    /// 指定次数の未解放グルーピングが保持するunit数を返す.
    pub fn units(&self, order: Order) -> usize {
        self.count(order) << order.as_u8()
    }

    /// 全次数の未解放グルーピング数の合計を返す.
    pub fn total_groupings(&self) -> usize {
        self.counts.iter().sum()
    }

    /// 全次数の未解放unit数の合計を返す.
    pub fn total_units(&self) -> usize {
        self.iter().map(|s| s.units).sum()
    }

    /// 次数の昇順に統計値を列挙する.
    pub fn iter(&self) -> impl Iterator<Item = TierStat> + '_ {
        Order::up_to(self.max_order).map(move |order| TierStat {
            order,
            count: self.count(order),
            units: self.units(order),
        })
    }
}
impl fmt::Display for TierReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ORDER:")?;
        for order in Order::up_to(self.max_order) {
            write!(f, " {:8}", order.as_u8())?;
        }
        write!(f, "\nCOUNT:")?;
        for stat in self.iter() {
            write!(f, " {:8}", stat.count)?;
        }
        write!(f, "\nTOTAL: {}", self.total_units())
    }
}
