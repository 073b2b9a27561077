//! ブロックソースのインターフェース定義と実装群.
//!
//! このモジュールは[BulkAllocator](../allocator/struct.BulkAllocator.html)が
//! unitのグルーピングを取得・返却するための供給元を提供する.
use std::fmt;
use std::sync::Arc;

pub use self::memory::{MemoryBlockSource, DEFAULT_UNIT_SIZE};
#[cfg(unix)]
pub use self::mmap::MmapBlockSource;

use crate::order::Order;

mod memory;
#[cfg(unix)]
mod mmap;

/// unitを識別するための不透明なハンドル.
///
/// 一つのグルーピングに含まれるunit群は、先頭のハンドルから連番となる.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(u64);
impl UnitId {
    /// 新しい`UnitId`インスタンスを生成する.
    pub fn new(id: u64) -> Self {
        UnitId(id)
    }

    /// ハンドルの値を返す.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// このunitから`n`個後方のunitを返す.
    pub fn offset(self, n: usize) -> Self {
        UnitId(self.0 + n as u64)
    }
}
impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// `AddressResolver`によって解決されたunitのアドレス.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);
impl Address {
    /// 新しい`Address`インスタンスを生成する.
    pub fn new(address: u64) -> Self {
        Address(address)
    }

    /// アドレスの値を返す.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// グルーピング取得時の方針.
///
/// アロケータは、次数`1`以上では`AllocPolicy::opportunistic`を、
/// 最後の手段である次数`0`では`AllocPolicy::best_effort`を使用する.
///
/// 次数`0`で回収(reclaim)抑制の指定を外すのは、
/// 単一unitの要求が過度に厳しい条件で失敗しないようにするための方針であり、
/// ゼロ埋めの指定はどの次数でも維持される.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocPolicy {
    /// 返却されるunit群がゼロ埋めされている必要があるかどうか.
    pub zero_fill: bool,

    /// 空きを作るための回収や再試行を、ソース側で行っても良いかどうか.
    pub may_reclaim: bool,
}
impl AllocPolicy {
    /// 回収を行わず、即座に成否を返すことを期待する方針.
    pub fn opportunistic(zero_fill: bool) -> Self {
        AllocPolicy {
            zero_fill,
            may_reclaim: false,
        }
    }

    /// 回収を許容する、通常の方針.
    pub fn best_effort(zero_fill: bool) -> Self {
        AllocPolicy {
            zero_fill,
            may_reclaim: true,
        }
    }
}

/// unitのグルーピングの供給元を表すトレイト.
///
/// 実装は、複数のスレッドから同時に呼び出されても安全である必要がある.
pub trait BlockSource {
    /// `2^order`個の連続したunitから成るグルーピングを一つ取得する.
    ///
    /// 成功した場合には、先頭unitのハンドルが返される.
    /// グルーピング内のunitは`start.offset(0)`から`start.offset(order.units() - 1)`までの
    /// 互いに異なるハンドルで識別される.
    ///
    /// 空きがない場合には`None`が返される.
    /// これは通常の状況であり、呼び出し側はより小さい次数で再要求することが期待されている.
    fn try_alloc_grouping(&self, order: Order, policy: AllocPolicy) -> Option<UnitId>;

    /// 以前に`try_alloc_grouping`で取得したグルーピングを返却する.
    ///
    /// # 事前条件
    ///
    /// - `start`と`order`の組は、取得時のものと一致している
    /// - 当該グルーピングは未返却である
    fn free_grouping(&self, start: UnitId, order: Order);
}
impl<T: BlockSource + ?Sized> BlockSource for Arc<T> {
    fn try_alloc_grouping(&self, order: Order, policy: AllocPolicy) -> Option<UnitId> {
        (**self).try_alloc_grouping(order, policy)
    }
    fn free_grouping(&self, start: UnitId, order: Order) {
        (**self).free_grouping(start, order)
    }
}
impl<'a, T: BlockSource + ?Sized> BlockSource for &'a T {
    fn try_alloc_grouping(&self, order: Order, policy: AllocPolicy) -> Option<UnitId> {
        (**self).try_alloc_grouping(order, policy)
    }
    fn free_grouping(&self, start: UnitId, order: Order) {
        (**self).free_grouping(start, order)
    }
}

/// unitのハンドルをアドレスに変換するためのトレイト.
///
/// アロケータの補助的な出力(アドレス配列)を埋めるためにのみ使用される.
pub trait AddressResolver {
    /// `unit`に対応するアドレスを返す.
    fn resolve(&self, unit: UnitId) -> Address;
}
