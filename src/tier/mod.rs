//! 次数(tier)ごとの割当数を管理する統計テーブル.
//!
//! テーブルは、アロケータの構築時に注入される共有オブジェクトであり、
//! プロセス全体で唯一のグローバル変数としては実装されていない.
//! 同じテーブルを複数のアロケータで共有することも、テスト毎に独立したテーブルを用いることも可能.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use self::report::{TierReport, TierStat};

use crate::order::Order;
use crate::{ErrorKind, Result};

mod report;

/// 次数ごとの未解放グルーピング数を保持するテーブル.
///
/// 次数`k`のカウンタは「このテーブルを共有するアロケータ群から割り当てられ、まだ解放されていない、
/// `2^k`個のunitから成るグルーピングの数」に等しい.
///
/// カウンタの更新はアトミックに行われるため、
/// 複数のスレッドから同時に割当・解放・参照を行っても値が失われることはない.
///
/// インスタンスの複製は、同じカウンタ群を共有する.
#[derive(Debug, Clone)]
pub struct TierTable {
    max_order: Order,
    counts: Arc<Vec<AtomicUsize>>,
}
impl TierTable {
    /// 次数`0`から`max_order`までのカウンタを持つ、新しいテーブルを生成する.
    ///
    /// 全てのカウンタは`0`で初期化される.
    pub fn new(max_order: Order) -> Self {
        let counts = Order::up_to(max_order).map(|_| AtomicUsize::new(0)).collect();
        TierTable {
            max_order,
            counts: Arc::new(counts),
        }
    }

    /// テーブルが扱う最大の次数を返す.
    pub fn max_order(&self) -> Order {
        self.max_order
    }

    /// 指定次数の未解放グルーピング数を返す.
    ///
    /// テーブルの範囲外の次数に対しては`0`が返される.
    pub fn count(&self, order: Order) -> usize {
        self.counts
            .get(order.as_usize())
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    /// 現在の全カウンタの値を取得する.
    ///
    /// 各カウンタは個別にアトミックに読み出されるため、
    /// 並行して割当・解放が行われている場合には、テーブル全体としての一貫性は保証されない.
    pub fn snapshot(&self) -> TierReport {
        let counts = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .collect();
        TierReport::new(self.max_order, counts)
    }

    pub(crate) fn increment(&self, order: Order) {
        self.counts[order.as_usize()].fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decrement(&self, order: Order) -> Result<()> {
        let counter = &self.counts[order.as_usize()];
        let updated = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        track_assert!(
            updated.is_ok(),
            ErrorKind::InconsistentState,
            "Tier counter underflow: order={}",
            order
        );
        Ok(())
    }
}
