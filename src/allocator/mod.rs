//! 多段の次数を用いた一括アロケータ.
//!
//! アロケータは、要求されたunit数を満たすために、
//! ブロックソースから可能な限り大きな次数のグルーピングを取得し、
//! 取得できなくなった時点で、より小さい次数へと降りていく.
//!
//! 次数`0`まで降りても要求を満たせない場合には、それまでに取得したグルーピングを全て返却した上で失敗する.
//! 呼び出し側から見て、部分的に割り当てられたunitが残ることはない.
use slog::Logger;
use std::fmt;
use std::sync::Arc;

pub use self::batch::{Batch, BatchState, Grouping, Unit};
pub use self::builder::BulkAllocatorBuilder;

use self::batch::Filling;
use crate::metrics::AllocatorMetrics;
use crate::order::Order;
use crate::source::{Address, AddressResolver, AllocPolicy, BlockSource};
use crate::tier::{TierReport, TierTable};
use crate::{Error, ErrorKind, Result};

mod batch;
mod builder;

/// 多段の次数を用いた一括アロケータ.
///
/// # 割当戦略
///
/// `n`個のunitの割当要求に対しては、以下の手順で割当が行われる:
///
/// 1. 次数の初期値を`min(floor(log2(n)), max_order)`とする
/// 2. 残りのunit数が`2^order`以上である限り、その次数のグルーピングをソースに要求する
///    - 成功したら、バッチに追加して統計テーブルの該当次数をインクリメントする
///    - 失敗したら(断片化等)、次の小さい次数に移る
/// 3. 次数`0`まで繰り返す
///
/// 次数`1`以上の要求は`AllocPolicy::opportunistic`で行われ、
/// 最後の手段である次数`0`の要求のみ`AllocPolicy::best_effort`で行われる.
///
/// 例えば、常に成功するソースに対して`13`個のunitを要求した場合には、
/// 次数`3`, `2`, `0`のグルーピング(`8 + 4 + 1`)から成るバッチが返される.
///
/// # 並行性
///
/// 全てのメソッドは`&self`を受け取り、ソースが`Sync`であれば、
/// 複数のスレッドから同時に(独立したバッチに対して)割当・解放を行うことができる.
pub struct BulkAllocator<S> {
    source: S,
    resolver: Option<Arc<dyn AddressResolver + Send + Sync>>,
    table: TierTable,
    max_order: Order,
    logger: Logger,
    metrics: AllocatorMetrics,
}
impl<S: BlockSource> BulkAllocator<S> {
    /// デフォルト設定で`BulkAllocator`を生成する.
    ///
    /// `BulkAllocatorBuilder::new().finish(source)`と等しい.
    pub fn new(source: S) -> Self {
        BulkAllocatorBuilder::new().build(source, TierTable::new(Order::max()))
    }

    /// `units`個のunitを割り当てる.
    ///
    /// `zero_fill`が`true`の場合には、返されるunit群は全てゼロ埋めされている.
    ///
    /// # Errors
    ///
    /// - `units`が`0`の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される
    /// - ソースから十分なunitを取得できなかった場合には、種類が`ErrorKind::OutOfMemory`のエラーが返される
    ///   - この場合、途中まで取得していたグルーピングは全てソースに返却済みである
    pub fn acquire(&self, units: usize, zero_fill: bool) -> Result<Batch> {
        track!(self.acquire_impl(units, zero_fill))
    }

    /// `units`個のunitを割り当て、それぞれのアドレスを`addresses`に格納する.
    ///
    /// `addresses[i]`には`batch.units()`の`i`番目のunitのアドレスが格納される.
    /// `AddressResolver`が設定されていない場合には、`addresses`は更新されない.
    ///
    /// # Errors
    ///
    /// `acquire`が返すエラーに加えて、`addresses`の長さが`units`と異なる場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn acquire_with_addresses(
        &self,
        units: usize,
        zero_fill: bool,
        addresses: &mut [Address],
    ) -> Result<Batch> {
        if addresses.len() != units {
            self.metrics.invalid_input_failures.increment();
            track_panic!(
                ErrorKind::InvalidInput,
                "addresses.len()={}, units={}",
                addresses.len(),
                units
            );
        }

        let batch = track!(self.acquire_impl(units, zero_fill))?;
        if let Some(ref resolver) = self.resolver {
            for (address, unit) in addresses.iter_mut().zip(batch.units()) {
                *address = resolver.resolve(unit.id);
            }
        }
        Ok(batch)
    }

    /// 割当済みのバッチを解放する.
    ///
    /// バッチ内の全てのグルーピングがソースに返却され、統計テーブルの該当次数がデクリメントされる.
    ///
    /// # Errors
    ///
    /// 統計テーブルとバッチの内容が矛盾している場合には、種類が`ErrorKind::InconsistentState`のエラーが返される.
    /// その場合でも、グルーピングの返却自体は全て行われる.
    pub fn release(&self, batch: Batch) -> Result<()> {
        let expected = batch.len();
        let groupings = batch.into_groupings();
        track!(self.release_groupings(&groupings, expected))?;
        debug!(
            self.logger,
            "Batch released";
            "units" => expected,
            "groupings" => groupings.len(),
            "state" => BatchState::Released.as_str()
        );
        Ok(())
    }

    /// 統計テーブルの現在の値を返す.
    pub fn report(&self) -> TierReport {
        self.table.snapshot()
    }

    /// アロケータが使用している統計テーブルを返す.
    pub fn tier_table(&self) -> &TierTable {
        &self.table
    }

    /// アロケータ用のメトリクスを返す.
    pub fn metrics(&self) -> &AllocatorMetrics {
        &self.metrics
    }

    /// ソースに要求するグルーピングの最大次数を返す.
    pub fn max_order(&self) -> Order {
        self.max_order
    }

    /// ブロックソースへの参照を返す.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn acquire_impl(&self, units: usize, zero_fill: bool) -> Result<Batch> {
        if units == 0 {
            self.metrics.invalid_input_failures.increment();
            track_panic!(ErrorKind::InvalidInput, "Empty request");
        }

        let mut filling = Filling::new(units);
        let mut order = Order::floor_log2(units, self.max_order);
        loop {
            let policy = if order == Order::zero() {
                // 最後の手段なので、回収を伴う通常の割当を許容する
                AllocPolicy::best_effort(zero_fill)
            } else {
                AllocPolicy::opportunistic(zero_fill)
            };

            while filling.remaining() >= order.units() {
                if let Some(start) = self.source.try_alloc_grouping(order, policy) {
                    let grouping = Grouping::new(start, order);
                    self.table.increment(order);
                    self.metrics.count_acquisition(order);
                    trace!(
                        self.logger,
                        "Grouping acquired";
                        "start" => start.as_u64(),
                        "order" => order.as_u8(),
                        "state" => filling.state().as_str()
                    );
                    filling.push(grouping);
                } else {
                    self.metrics.count_fallback(order);
                    debug!(
                        self.logger,
                        "Block source exhausted at order {}", order;
                        "remaining" => filling.remaining()
                    );
                    break;
                }
            }

            if filling.remaining() == 0 {
                break;
            }
            match order.lower() {
                Some(lower) => order = lower,
                None => break,
            }
        }

        let missing = filling.remaining();
        if missing != 0 {
            error!(
                self.logger,
                "Failed to allocate {:#x} units ({:#x} left)", units, missing;
                "state" => BatchState::RolledBack.as_str()
            );
            self.metrics.out_of_memory_failures.increment();

            let acquired = filling.filled();
            let groupings = filling.into_groupings();
            self.metrics
                .rolled_back_groupings
                .add_u64(groupings.len() as u64);
            track!(self.release_groupings(&groupings, acquired))?;
            return Err(track!(Error::out_of_memory(units, missing)));
        }
        Ok(filling.into_batch())
    }

    // カウンタの更新に失敗しても、全てのグルーピングを返却する
    fn release_groupings(&self, groupings: &[Grouping], expected: usize) -> Result<()> {
        let mut result = Ok(());
        let mut released = 0;
        for g in groupings {
            self.source.free_grouping(g.start(), g.order());
            self.metrics.count_releasion(g.order());
            released += g.len();
            trace!(
                self.logger,
                "Grouping released";
                "start" => g.start().as_u64(),
                "order" => g.order().as_u8()
            );

            if let Err(e) = self.table.decrement(g.order()) {
                warn!(self.logger, "{}", e; "order" => g.order().as_u8());
                if result.is_ok() {
                    result = Err(track!(e));
                }
            }
        }

        if released != expected {
            warn!(
                self.logger,
                "Released units mismatch";
                "released" => released,
                "expected" => expected
            );
        }
        track_assert_eq!(released, expected, ErrorKind::InconsistentState);
        result
    }
}
impl<S: fmt::Debug> fmt::Debug for BulkAllocator<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BulkAllocator")
            .field("source", &self.source)
            .field("resolver", &self.resolver.is_some())
            .field("table", &self.table)
            .field("max_order", &self.max_order)
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use trackable::result::TestResult;

    use super::*;
    use crate::source::{MemoryBlockSource, UnitId};

    fn order(n: u8) -> Order {
        Order::new(n).expect("Never fails")
    }

    fn default_allocator(source: MemoryBlockSource) -> BulkAllocator<MemoryBlockSource> {
        BulkAllocator::new(source)
    }

    fn orders(batch: &Batch) -> Vec<u8> {
        batch.groupings().iter().map(|g| g.order().as_u8()).collect()
    }

    #[test]
    fn it_works() -> TestResult {
        let mut source = MemoryBlockSource::new(64);
        source.set_max_order(order(3));
        let allocator = default_allocator(source);

        let batch = track!(allocator.acquire(13, false))?;
        assert_eq!(batch.len(), 13);
        assert_eq!(batch.units().count(), 13);
        assert_eq!(orders(&batch), vec![3, 2, 0]);

        let report = allocator.report();
        assert_eq!(report.count(order(3)), 1);
        assert_eq!(report.count(order(2)), 1);
        assert_eq!(report.count(order(1)), 0);
        assert_eq!(report.count(order(0)), 1);
        assert_eq!(report.total_units(), 13);
        assert_eq!(allocator.source().allocated_units(), 13);

        track!(allocator.release(batch))?;
        assert_eq!(allocator.report().total_groupings(), 0);
        assert_eq!(allocator.source().allocated_units(), 0);
        Ok(())
    }

    #[test]
    fn exact_length_for_any_request() -> TestResult {
        let allocator = default_allocator(MemoryBlockSource::new(4096));
        let before = allocator.report();
        for n in 1..=300 {
            let batch = track!(allocator.acquire(n, n % 2 == 0))?;
            assert_eq!(batch.len(), n);
            assert_eq!(batch.units().count(), n);
            assert_eq!(allocator.report().total_units(), n);

            track!(allocator.release(batch))?;
            assert_eq!(allocator.report(), before);
        }
        Ok(())
    }

    #[test]
    fn max_order_is_respected() -> TestResult {
        let source = MemoryBlockSource::new(1 << 12);
        let allocator = track!(BulkAllocatorBuilder::new().max_order(order(2)).finish(source))?;

        let batch = track!(allocator.acquire(11, false))?;
        assert_eq!(orders(&batch), vec![2, 2, 1, 0]);
        assert_eq!(allocator.report().count(order(2)), 2);
        track!(allocator.release(batch))?;
        Ok(())
    }

    #[test]
    fn order_zero_only_source() -> TestResult {
        let mut source = MemoryBlockSource::new(64);
        source.set_max_order(Order::zero());
        let allocator = default_allocator(source);

        let batch = track!(allocator.acquire(1 << 5, false))?;
        assert_eq!(batch.len(), 32);
        assert!(batch.groupings().iter().all(|g| g.order() == Order::zero()));

        let report = allocator.report();
        assert_eq!(report.count(Order::zero()), 32);
        assert_eq!(report.total_groupings(), 32);

        let m = allocator.metrics();
        assert_eq!(m.order_fallbacks(order(5)), 1);
        assert_eq!(m.order_fallbacks(order(1)), 1);
        assert_eq!(m.order_fallbacks(Order::zero()), 0);
        assert_eq!(m.acquired_groupings(Order::zero()), 32);
        track!(allocator.release(batch))?;
        Ok(())
    }

    #[test]
    fn rollback_on_shortfall() -> TestResult {
        let mut source = MemoryBlockSource::new(5);
        source.set_max_order(Order::zero());
        let allocator = default_allocator(source);
        let before = allocator.report();

        let e = allocator.acquire(10, false).err().expect("Must fail");
        assert_eq!(*e.kind(), ErrorKind::OutOfMemory);
        let shortfall = e.shortfall().expect("Must have a shortfall");
        assert_eq!(shortfall.requested, 10);
        assert_eq!(shortfall.missing, 5);

        assert_eq!(allocator.report(), before);
        assert_eq!(allocator.report().total_units(), 0);
        assert_eq!(allocator.source().allocated_units(), 0);

        let m = allocator.metrics();
        assert_eq!(m.acquire_failures(), (0, 1));
        assert_eq!(m.rolled_back_groupings(), 5);
        assert_eq!(m.outstanding_units(), 0);
        Ok(())
    }

    #[test]
    fn rollback_keeps_other_batches() -> TestResult {
        let allocator = default_allocator(MemoryBlockSource::new(16));
        let held = track!(allocator.acquire(6, false))?;
        let before = allocator.report();

        let e = allocator.acquire(12, false).err().expect("Must fail");
        assert_eq!(*e.kind(), ErrorKind::OutOfMemory);
        assert_eq!(e.shortfall().map(|s| s.missing), Some(2));
        assert_eq!(allocator.report(), before);
        assert_eq!(allocator.source().allocated_units(), 6);

        track!(allocator.release(held))?;
        assert_eq!(allocator.source().allocated_units(), 0);
        Ok(())
    }

    #[test]
    fn fragmentation_falls_back_to_smaller_orders() -> TestResult {
        let allocator = default_allocator(MemoryBlockSource::new(16));

        // 偶数番目のunitのみを残して、次数1以上の空きを無くす
        let singles = (0..16)
            .map(|_| allocator.acquire(1, false))
            .collect::<Result<Vec<_>>>();
        let singles = track!(singles)?;
        let mut kept = Vec::new();
        for (i, batch) in singles.into_iter().enumerate() {
            if i % 2 == 0 {
                track!(allocator.release(batch))?;
            } else {
                kept.push(batch);
            }
        }

        let batch = track!(allocator.acquire(8, false))?;
        assert_eq!(batch.groupings().len(), 8);
        assert!(batch.units().all(|u| u.id.as_u64() % 2 == 0));
        assert_eq!(allocator.report().count(Order::zero()), 16);
        assert_eq!(allocator.metrics().order_fallbacks(order(3)), 1);

        track!(allocator.release(batch))?;
        for batch in kept {
            track!(allocator.release(batch))?;
        }
        assert_eq!(allocator.report().total_groupings(), 0);
        Ok(())
    }

    #[test]
    fn order_zero_relaxes_reclaim_hint() -> TestResult {
        let mut source = MemoryBlockSource::new(8);
        source.set_fail_opportunistic(true);
        let allocator = default_allocator(source);

        let batch = track!(allocator.acquire(4, true))?;
        assert_eq!(orders(&batch), vec![0, 0, 0, 0]);
        for g in batch.groupings() {
            assert!(allocator.source().is_zeroed(g.start(), g.order()));
        }
        track!(allocator.release(batch))?;
        Ok(())
    }

    #[test]
    fn zero_fill() -> TestResult {
        let allocator = default_allocator(MemoryBlockSource::new(32));

        // 一度汚してから解放する
        let dirty = track!(allocator.acquire(32, false))?;
        track!(allocator.release(dirty))?;

        let batch = track!(allocator.acquire(7, true))?;
        assert_eq!(orders(&batch), vec![2, 1, 0]);
        for g in batch.groupings() {
            assert!(allocator.source().is_zeroed(g.start(), g.order()));
        }
        track!(allocator.release(batch))?;

        let batch = track!(allocator.acquire(7, false))?;
        for g in batch.groupings() {
            assert!(!allocator.source().is_zeroed(g.start(), g.order()));
        }
        track!(allocator.release(batch))?;
        Ok(())
    }

    #[test]
    fn addresses() -> TestResult {
        let source = Arc::new(MemoryBlockSource::with_unit_size(16, 4096));
        let allocator = track!(BulkAllocatorBuilder::new()
            .address_resolver(source.clone())
            .finish(source.clone()))?;

        let mut addresses = vec![Address::default(); 3];
        let batch = track!(allocator.acquire_with_addresses(3, false, &mut addresses))?;
        assert_eq!(orders(&batch), vec![1, 0]);
        let expected = batch
            .units()
            .map(|u| Address::new(u.id.as_u64() * 4096))
            .collect::<Vec<_>>();
        assert_eq!(addresses, expected);
        assert_eq!(addresses[1].as_u64(), addresses[0].as_u64() + 4096);
        track!(allocator.release(batch))?;

        // 長さが一致しない
        let mut short = vec![Address::default(); 2];
        let e = allocator.acquire_with_addresses(3, false, &mut short).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
        assert_eq!(allocator.report().total_groupings(), 0);
        Ok(())
    }

    #[test]
    fn addresses_without_resolver() -> TestResult {
        let allocator = default_allocator(MemoryBlockSource::new(4));
        let mut addresses = vec![Address::new(1); 2];
        let batch = track!(allocator.acquire_with_addresses(2, false, &mut addresses))?;
        assert_eq!(addresses, vec![Address::new(1); 2]);
        track!(allocator.release(batch))?;
        Ok(())
    }

    #[test]
    fn empty_request_is_rejected() -> TestResult {
        let allocator = default_allocator(MemoryBlockSource::new(4));
        let e = allocator.acquire(0, false).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
        assert_eq!(allocator.metrics().acquire_failures(), (1, 0));
        assert_eq!(allocator.source().allocated_units(), 0);
        Ok(())
    }

    #[test]
    fn shared_tier_table() -> TestResult {
        let table = TierTable::new(Order::max());
        let a = track!(BulkAllocatorBuilder::new()
            .tier_table(table.clone())
            .finish(MemoryBlockSource::new(8)))?;
        let b = track!(BulkAllocatorBuilder::new()
            .tier_table(table.clone())
            .finish(MemoryBlockSource::new(8)))?;

        let x = track!(a.acquire(4, false))?;
        let y = track!(b.acquire(5, false))?;
        assert_eq!(table.count(order(2)), 2);
        assert_eq!(table.count(Order::zero()), 1);
        assert_eq!(table.snapshot().total_units(), 9);

        track!(a.release(x))?;
        track!(b.release(y))?;
        assert_eq!(table.snapshot().total_units(), 0);
        Ok(())
    }

    #[test]
    fn too_small_tier_table_is_rejected() -> TestResult {
        let table = TierTable::new(order(2));
        let e = BulkAllocatorBuilder::new()
            .tier_table(table)
            .max_order(order(3))
            .finish(MemoryBlockSource::new(8))
            .err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
        Ok(())
    }

    #[test]
    fn release_detects_inconsistent_table() -> TestResult {
        let source = MemoryBlockSource::new(8);
        let table = TierTable::new(Order::max());
        let allocator = track!(BulkAllocatorBuilder::new()
            .tier_table(table.clone())
            .finish(&source))?;

        let batch = track!(allocator.acquire(3, false))?;
        // 外部からカウンタを壊す
        track!(table.decrement(order(1)))?;

        let e = allocator.release(batch).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InconsistentState));

        // それでもunitは全て返却されている
        assert_eq!(source.allocated_units(), 0);
        assert_eq!(table.count(Order::zero()), 0);
        Ok(())
    }

    #[test]
    fn concurrent_single_unit_batches() -> TestResult {
        let allocator = Arc::new(default_allocator(MemoryBlockSource::new(1024)));
        let handles = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for i in 0..100 {
                        let batch = allocator.acquire(1, false).expect("Never fails");
                        if i % 4 == 0 {
                            held.push(batch);
                        } else {
                            allocator.release(batch).expect("Never fails");
                        }
                    }
                    held
                })
            })
            .collect::<Vec<_>>();

        let mut held = Vec::new();
        for h in handles {
            held.extend(h.join().expect("Never fails"));
        }
        assert_eq!(held.len(), 8 * 25);
        assert_eq!(allocator.report().count(Order::zero()), held.len());
        assert_eq!(allocator.source().allocated_units(), held.len());

        let mut ids = held
            .iter()
            .flat_map(|b| b.units().map(|u| u.id))
            .collect::<Vec<UnitId>>();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), held.len());

        for batch in held {
            track!(allocator.release(batch))?;
        }
        assert_eq!(allocator.report().count(Order::zero()), 0);
        Ok(())
    }
}
