use crate::order::Order;
use crate::source::UnitId;

/// 一度のソース呼び出しで取得された、`2^order`個の連続したunit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Grouping {
    start: UnitId,
    order: Order,
}
#[allow(clippy::len_without_is_empty)]
impl Grouping {
    pub(crate) fn new(start: UnitId, order: Order) -> Self {
        Grouping { start, order }
    }

    /// 先頭unitのハンドルを返す.
    pub fn start(&self) -> UnitId {
        self.start
    }

    /// グルーピングの次数を返す.
    pub fn order(&self) -> Order {
        self.order
    }

    /// グルーピングに含まれるunitの数を返す.
    pub fn len(&self) -> usize {
        self.order.units()
    }

    /// グルーピングに含まれるunitを先頭から順に列挙する.
    pub fn units(&self) -> impl Iterator<Item = Unit> {
        let Grouping { start, order } = *self;
        (0..order.units()).map(move |i| Unit {
            id: start.offset(i),
            order,
        })
    }
}

/// バッチ内の個々のunit.
///
/// 所属するグルーピングの次数をタグとして保持している.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Unit {
    /// unitのハンドル.
    pub id: UnitId,

    /// 所属するグルーピングの次数.
    pub order: Order,
}

/// バッチの状態.
///
/// ```text
/// Empty --> Filling --> Complete --> Released
///                  \--> RolledBack
/// ```
///
/// `Empty`および`Filling`の状態のバッチは、アロケータの外部に出ることはない.
/// `Released`および`RolledBack`の状態のバッチは、既に消費されているため、再利用することはできない.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// 一つもグルーピングを保持していない.
    Empty,

    /// 割当の途中.
    Filling,

    /// 要求されたunit数ちょうどのグルーピングを保持している.
    Complete,

    /// 割当に失敗し、保持していたグルーピングが全てソースに返却された.
    RolledBack,

    /// `BulkAllocator::release`によって解放された.
    Released,
}
impl BatchState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            BatchState::Empty => "empty",
            BatchState::Filling => "filling",
            BatchState::Complete => "complete",
            BatchState::RolledBack => "rolled_back",
            BatchState::Released => "released",
        }
    }
}

/// 一つの割当要求を満たすグルーピング群.
///
/// グルーピングは取得された順(i.e., 次数の降順)に並んでおり、
/// それらが保持するunitの合計は、要求されたunit数と常に一致する.
///
/// 使用後は`BulkAllocator::release`に渡して解放する必要がある.
/// 単に破棄した場合には、unit群はソースに返却されない.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct Batch {
    groupings: Vec<Grouping>,
    len: usize,
}
impl Batch {
    /// バッチが保持するunitの数を返す.
    pub fn len(&self) -> usize {
        self.len
    }

    /// バッチが空かどうかを判定する.
    ///
    /// 割当に成功したバッチは、常に一つ以上のunitを保持している.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// バッチの状態を返す.
    pub fn state(&self) -> BatchState {
        BatchState::Complete
    }

    /// バッチが保持するグルーピング群を返す.
    pub fn groupings(&self) -> &[Grouping] {
        &self.groupings
    }

    /// バッチが保持するunitを先頭から順に列挙する.
    pub fn units<'a>(&'a self) -> impl Iterator<Item = Unit> + 'a {
        self.groupings.iter().flat_map(|g| g.units())
    }

    pub(crate) fn into_groupings(self) -> Vec<Grouping> {
        self.groupings
    }
}

/// 割当途中のバッチ.
#[derive(Debug)]
pub(crate) struct Filling {
    groupings: Vec<Grouping>,
    requested: usize,
    filled: usize,
}
impl Filling {
    pub fn new(requested: usize) -> Self {
        Filling {
            groupings: Vec::new(),
            requested,
            filled: 0,
        }
    }

    pub fn state(&self) -> BatchState {
        if self.groupings.is_empty() {
            BatchState::Empty
        } else {
            BatchState::Filling
        }
    }

    pub fn remaining(&self) -> usize {
        self.requested - self.filled
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn push(&mut self, grouping: Grouping) {
        debug_assert!(grouping.len() <= self.remaining());
        self.filled += grouping.len();
        self.groupings.push(grouping);
    }

    pub fn into_batch(self) -> Batch {
        debug_assert_eq!(self.remaining(), 0);
        Batch {
            groupings: self.groupings,
            len: self.filled,
        }
    }

    pub fn into_groupings(self) -> Vec<Grouping> {
        self.groupings
    }
}
