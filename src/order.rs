//! 割当の次数(order)関連の構成要素.
use std::fmt;

use crate::{ErrorKind, Result};

/// 連続した割当単位(unit)の個数を、2の冪の指数で表現するための構造体.
///
/// 次数`k`のグルーピングは、`2^k`個の連続したunitから構成される.
///
/// アロケータの統計テーブルでは"tier"のインデックスとしても使われる.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Order(u8);
impl Order {
    /// 許容される次数の最大値.
    ///
    /// 一度のソース呼び出しで要求可能な連続unit数の上限(`2^MAX`)を決める.
    ///
    /// また`Order::max()`で使われる値でもある.
    pub const MAX: u8 = 10;

    /// 次数`0`(単一のunit)を返す.
    pub fn zero() -> Self {
        Order(0)
    }

    /// 許容可能な最大の次数を持つ`Order`インスタンスを返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use tierpool::Order;
    ///
    /// assert_eq!(Order::max().as_u8(), Order::MAX);
    /// ```
    pub fn max() -> Self {
        Order(Self::MAX)
    }

    /// 指定された値の次数を表現する`Order`インスタンスを生成する.
    ///
    /// # Errors
    ///
    /// `order`が`Order::MAX`を超えている場合には、種類が`ErrorKind::InvalidInput`のエラーが返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use tierpool::{ErrorKind, Order};
    ///
    /// assert_eq!(Order::new(3).ok().map(|o| o.units()), Some(8));
    /// assert_eq!(Order::new(11).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(order: u8) -> Result<Self> {
        track_assert!(order <= Self::MAX, ErrorKind::InvalidInput, "order={}", order);
        Ok(Order(order))
    }

    /// `units`個以下で最大の2の冪に対応する次数を返す.
    ///
    /// 結果は`ceiling`で頭打ちになる.
    /// `units`が`0`の場合には、次数`0`が返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use tierpool::Order;
    ///
    /// let ceiling = Order::max();
    /// assert_eq!(Order::floor_log2(1, ceiling).as_u8(), 0);
    /// assert_eq!(Order::floor_log2(13, ceiling).as_u8(), 3);
    /// assert_eq!(Order::floor_log2(16, ceiling).as_u8(), 4);
    /// assert_eq!(Order::floor_log2(1 << 20, ceiling), ceiling);
    /// ```
    pub fn floor_log2(units: usize, ceiling: Order) -> Self {
        if units == 0 {
            return Order(0);
        }
        let log2 = 63 - (units as u64).leading_zeros();
        if log2 > u32::from(ceiling.0) {
            ceiling
        } else {
            Order(log2 as u8)
        }
    }

    /// 一つ小さい次数を返す.
    ///
    /// 次数`0`の場合には`None`が返される.
    pub fn lower(self) -> Option<Self> {
        self.0.checked_sub(1).map(Order)
    }

    /// 次数`0`から`max`までを昇順に列挙する.
    pub fn up_to(max: Order) -> impl Iterator<Item = Order> {
        (0..=max.0).map(Order)
    }

    /// この次数のグルーピングに含まれるunitの数(`2^order`)を返す.
    pub fn units(self) -> usize {
        1 << self.0
    }

    /// 次数を`u8`に変換して返す.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// 次数を`usize`に変換して返す.
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}
impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
