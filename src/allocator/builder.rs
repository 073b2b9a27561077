use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::fmt;
use std::sync::Arc;

use super::BulkAllocator;
use crate::metrics::AllocatorMetrics;
use crate::order::Order;
use crate::source::{AddressResolver, BlockSource};
use crate::tier::TierTable;
use crate::{ErrorKind, Result};

/// `BulkAllocator`のビルダ.
#[derive(Clone)]
pub struct BulkAllocatorBuilder {
    max_order: Order,
    tier_table: Option<TierTable>,
    resolver: Option<Arc<dyn AddressResolver + Send + Sync>>,
    logger: Logger,
    metrics: MetricBuilder,
}
impl BulkAllocatorBuilder {
    /// デフォルト設定で`BulkAllocatorBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        BulkAllocatorBuilder {
            max_order: Order::max(),
            tier_table: None,
            resolver: None,
            logger: Logger::root(Discard, o!()),
            metrics: MetricBuilder::new(),
        }
    }

    /// ソースに要求するグルーピングの最大次数を設定する.
    ///
    /// 割当要求は、まず「要求unit数以下の最大の2の冪」と、この値の小さい方の次数から試行される.
    ///
    /// デフォルト値は`Order::max()`.
    pub fn max_order(&mut self, order: Order) -> &mut Self {
        self.max_order = order;
        self
    }

    /// 割当状況を記録する統計テーブルを設定する.
    ///
    /// 同じテーブルを複数のアロケータに設定した場合には、それらの割当状況が合算される.
    ///
    /// デフォルトでは、`max_order`に合わせたテーブルが新規に生成される.
    pub fn tier_table(&mut self, table: TierTable) -> &mut Self {
        self.tier_table = Some(table);
        self
    }

    /// unitのアドレス解決に使用する`AddressResolver`を設定する.
    ///
    /// 設定されていない場合には、`BulkAllocator::acquire_with_addresses`に渡した配列は更新されない.
    pub fn address_resolver(&mut self, resolver: Arc<dyn AddressResolver + Send + Sync>) -> &mut Self {
        self.resolver = Some(resolver);
        self
    }

    /// アロケータ用の logger を登録する.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// 指定されたブロックソースを用いる`BulkAllocator`を生成する.
    ///
    /// # Errors
    ///
    /// 設定された統計テーブルが`max_order`までの次数を扱えない場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn finish<S: BlockSource>(&self, source: S) -> Result<BulkAllocator<S>> {
        let table = if let Some(table) = self.tier_table.clone() {
            track_assert!(
                self.max_order <= table.max_order(),
                ErrorKind::InvalidInput,
                "max_order={}, table.max_order={}",
                self.max_order,
                table.max_order()
            );
            table
        } else {
            TierTable::new(self.max_order)
        };
        Ok(self.build(source, table))
    }

    pub(super) fn build<S: BlockSource>(&self, source: S, table: TierTable) -> BulkAllocator<S> {
        let logger = self.logger.new(o!("max_order" => self.max_order.as_u8()));
        BulkAllocator {
            source,
            resolver: self.resolver.clone(),
            table,
            max_order: self.max_order,
            logger,
            metrics: AllocatorMetrics::new(&self.metrics, self.max_order),
        }
    }
}
impl Default for BulkAllocatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl fmt::Debug for BulkAllocatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BulkAllocatorBuilder")
            .field("max_order", &self.max_order)
            .field("tier_table", &self.tier_table)
            .field("resolver", &self.resolver.is_some())
            .field("logger", &self.logger)
            .field("metrics", &self.metrics)
            .finish()
    }
}
