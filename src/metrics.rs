//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, MetricBuilder};

use crate::order::Order;

/// `BulkAllocator`のメトリクス.
///
/// 次数ごとの"現在の"未解放数は`TierTable`が保持しており、
/// こちらは累積値(カウンタ)のみを扱う.
#[derive(Debug, Clone)]
pub struct AllocatorMetrics {
    pub(crate) acquired_groupings: Vec<Counter>,
    pub(crate) released_groupings: Vec<Counter>,
    pub(crate) order_fallbacks: Vec<Counter>,
    pub(crate) acquired_units: Counter,
    pub(crate) released_units: Counter,
    pub(crate) invalid_input_failures: Counter,
    pub(crate) out_of_memory_failures: Counter,
    pub(crate) rolled_back_groupings: Counter,
}
impl AllocatorMetrics {
    /// ブロックソースから取得したグルーピングの数.
    ///
    /// 途中で巻き戻されたものも含む.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// tierpool_allocator_acquired_groupings_total { order="0|1|..." } <COUNTER>
    /// ```
    pub fn acquired_groupings(&self, order: Order) -> u64 {
        Self::value_of(&self.acquired_groupings, order)
    }

    /// ブロックソースに返却したグルーピングの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// tierpool_allocator_released_groupings_total { order="0|1|..." } <COUNTER>
    /// ```
    pub fn released_groupings(&self, order: Order) -> u64 {
        Self::value_of(&self.released_groupings, order)
    }

    /// 指定次数での取得に失敗し、より小さい次数に降りた回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// tierpool_allocator_order_fallbacks_total { order="0|1|..." } <COUNTER>
    /// ```
    pub fn order_fallbacks(&self, order: Order) -> u64 {
        Self::value_of(&self.order_fallbacks, order)
    }

    /// これまでに取得したunitの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// tierpool_allocator_acquired_units_total <COUNTER>
    /// ```
    pub fn acquired_units(&self) -> u64 {
        self.acquired_units.value() as u64
    }

    /// これまでに返却したunitの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// tierpool_allocator_released_units_total <COUNTER>
    /// ```
    pub fn released_units(&self) -> u64 {
        self.released_units.value() as u64
    }

    /// 未返却のunitの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// tierpool_allocator_acquired_units_total - tierpool_allocator_released_units_total
    /// ```
    pub fn outstanding_units(&self) -> u64 {
        // NOTE: 以下の順番で値を取得しないとアンダーフローする可能性がある
        let dec = self.released_units();
        let inc = self.acquired_units();
        inc - dec
    }

    /// 失敗した割当要求の数.
    ///
    /// 返り値のタプルの第一要素は`reason="invalid_input"`ラベルを持ち、
    /// 第二要素は`reason="out_of_memory"`ラベルを持つ.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// tierpool_allocator_acquire_failures_total { reason="invalid_input|out_of_memory" } <COUNTER>
    /// ```
    pub fn acquire_failures(&self) -> (u64, u64) {
        (
            self.invalid_input_failures.value() as u64,
            self.out_of_memory_failures.value() as u64,
        )
    }

    /// 割当失敗時に巻き戻されたグルーピングの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// tierpool_allocator_rolled_back_groupings_total <COUNTER>
    /// ```
    pub fn rolled_back_groupings(&self) -> u64 {
        self.rolled_back_groupings.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder, max_order: Order) -> Self {
        let mut builder = builder.clone();
        builder.namespace("tierpool").subsystem("allocator");
        AllocatorMetrics {
            acquired_groupings: Self::per_order(
                &builder,
                max_order,
                "acquired_groupings_total",
                "Number of groupings acquired from the block source",
            ),
            released_groupings: Self::per_order(
                &builder,
                max_order,
                "released_groupings_total",
                "Number of groupings returned to the block source",
            ),
            order_fallbacks: Self::per_order(
                &builder,
                max_order,
                "order_fallbacks_total",
                "Number of times the allocator fell back to a smaller order",
            ),
            acquired_units: builder
                .counter("acquired_units_total")
                .help("Number of units acquired from the block source")
                .finish()
                .expect("Never fails"),
            released_units: builder
                .counter("released_units_total")
                .help("Number of units returned to the block source")
                .finish()
                .expect("Never fails"),
            invalid_input_failures: builder
                .counter("acquire_failures_total")
                .help("Number of failed acquire requests")
                .label("reason", "invalid_input")
                .finish()
                .expect("Never fails"),
            out_of_memory_failures: builder
                .counter("acquire_failures_total")
                .help("Number of failed acquire requests")
                .label("reason", "out_of_memory")
                .finish()
                .expect("Never fails"),
            rolled_back_groupings: builder
                .counter("rolled_back_groupings_total")
                .help("Number of groupings released by rollback")
                .finish()
                .expect("Never fails"),
        }
    }

    pub(crate) fn count_acquisition(&self, order: Order) {
        self.acquired_groupings[order.as_usize()].increment();
        self.acquired_units.add_u64(order.units() as u64);
    }

    pub(crate) fn count_releasion(&self, order: Order) {
        self.released_groupings[order.as_usize()].increment();
        self.released_units.add_u64(order.units() as u64);
    }

    pub(crate) fn count_fallback(&self, order: Order) {
        self.order_fallbacks[order.as_usize()].increment();
    }

    fn per_order(
        builder: &MetricBuilder,
        max_order: Order,
        name: &str,
        help: &str,
    ) -> Vec<Counter> {
        Order::up_to(max_order)
            .map(|order| {
                builder
                    .counter(name)
                    .help(help)
                    .label("order", &order.to_string())
                    .finish()
                    .expect("Never fails")
            })
            .collect()
    }

    fn value_of(counters: &[Counter], order: Order) -> u64 {
        counters
            .get(order.as_usize())
            .map_or(0, |c| c.value() as u64)
    }
}
