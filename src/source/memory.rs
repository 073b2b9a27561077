use std::ops::Range;
use std::sync::{Mutex, MutexGuard};

use crate::order::Order;
use crate::source::{AddressResolver, AllocPolicy, Address, BlockSource, UnitId};

/// 解放済みのunitに書き込まれるバイト値.
const POISON: u8 = 0xA5;

/// `MemoryBlockSource`のunitサイズのデフォルト値.
pub const DEFAULT_UNIT_SIZE: usize = 64;

#[derive(Debug)]
struct Arena {
    bytes: Vec<u8>,
    used: Vec<bool>,
    allocated_units: usize,
}

/// メモリベースの`BlockSource`の実装.
///
/// 固定数のunitから成る領域を保持し、各グルーピングは自身のサイズ境界にアライメントされた位置から
/// (バディアロケータと同様に)先頭優先で切り出される.
///
/// また、次数の上限や、回収を伴わない要求の失敗、を指定することで、
/// 断片化やメモリ逼迫を模擬することができる.
///
/// # 注意
///
/// これは主にテストや性能計測用途を意図した実装である.
#[derive(Debug)]
pub struct MemoryBlockSource {
    unit_size: usize,
    max_order: Order,
    fail_opportunistic: bool,
    arena: Mutex<Arena>,
}
impl MemoryBlockSource {
    /// `capacity`個のunitを保持する`MemoryBlockSource`インスタンスを生成する.
    ///
    /// `MemoryBlockSource::with_unit_size(capacity, DEFAULT_UNIT_SIZE)`と等しい.
    pub fn new(capacity: usize) -> Self {
        Self::with_unit_size(capacity, DEFAULT_UNIT_SIZE)
    }

    /// unitサイズ(バイト単位)を指定して`MemoryBlockSource`インスタンスを生成する.
    pub fn with_unit_size(capacity: usize, unit_size: usize) -> Self {
        MemoryBlockSource {
            unit_size,
            max_order: Order::max(),
            fail_opportunistic: false,
            arena: Mutex::new(Arena {
                bytes: vec![POISON; capacity * unit_size],
                used: vec![false; capacity],
                allocated_units: 0,
            }),
        }
    }

    /// 取得可能なグルーピングの最大次数を設定する.
    ///
    /// これを超える次数の要求は常に失敗する.
    ///
    /// デフォルト値は`Order::max()`.
    pub fn set_max_order(&mut self, order: Order) {
        self.max_order = order;
    }

    /// `AllocPolicy::opportunistic`での要求を常に失敗させるかどうかを設定する.
    ///
    /// デフォルト値は`false`.
    pub fn set_fail_opportunistic(&mut self, fail: bool) {
        self.fail_opportunistic = fail;
    }

    /// 保持しているunitの総数を返す.
    pub fn capacity(&self) -> usize {
        self.lock().used.len()
    }

    /// unitサイズ(バイト単位)を返す.
    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// 現在割当中のunitの数を返す.
    pub fn allocated_units(&self) -> usize {
        self.lock().allocated_units
    }

    /// 指定グルーピングの内容が全てゼロかどうかを判定する.
    pub fn is_zeroed(&self, start: UnitId, order: Order) -> bool {
        let arena = self.lock();
        let range = self.byte_range(start, order);
        arena.bytes[range].iter().all(|&b| b == 0)
    }

    fn lock(&self) -> MutexGuard<Arena> {
        // 保持しているのは単純な配列群のみなので、パニック後も状態は利用可能
        self.arena.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn byte_range(&self, start: UnitId, order: Order) -> Range<usize> {
        let first = start.as_u64() as usize * self.unit_size;
        first..first + order.units() * self.unit_size
    }
}
impl BlockSource for MemoryBlockSource {
    fn try_alloc_grouping(&self, order: Order, policy: AllocPolicy) -> Option<UnitId> {
        if order > self.max_order || (self.fail_opportunistic && !policy.may_reclaim) {
            return None;
        }

        let mut arena = self.lock();
        let units = order.units();
        let capacity = arena.used.len();
        let start = (0..capacity)
            .step_by(units)
            .take_while(|&i| i + units <= capacity)
            .find(|&i| arena.used[i..i + units].iter().all(|&used| !used))?;

        for used in &mut arena.used[start..start + units] {
            *used = true;
        }
        arena.allocated_units += units;

        let start = UnitId::new(start as u64);
        if policy.zero_fill {
            let range = self.byte_range(start, order);
            for b in &mut arena.bytes[range] {
                *b = 0;
            }
        }
        Some(start)
    }

    fn free_grouping(&self, start: UnitId, order: Order) {
        let mut arena = self.lock();
        let first = start.as_u64() as usize;
        let units = order.units();
        assert!(
            first + units <= arena.used.len(),
            "start={}, order={}",
            start,
            order
        );
        for used in &mut arena.used[first..first + units] {
            assert!(*used, "start={}, order={}", start, order);
            *used = false;
        }
        arena.allocated_units -= units;

        let range = self.byte_range(start, order);
        for b in &mut arena.bytes[range] {
            *b = POISON;
        }
    }
}
impl AddressResolver for MemoryBlockSource {
    fn resolve(&self, unit: UnitId) -> Address {
        Address::new(unit.as_u64() * self.unit_size as u64)
    }
}
