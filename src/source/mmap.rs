use libc;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::order::Order;
use crate::source::{AddressResolver, AllocPolicy, Address, BlockSource, UnitId};
use crate::{Error, ErrorKind, Result};

/// 匿名`mmap(2)`を用いた`BlockSource`の実装.
///
/// 各グルーピングは、`unit_size << order`バイトの独立したマッピングとして確保される.
/// unitサイズはシステムのページサイズと等しく、
/// unitのハンドルは「アドレス / unitサイズ」(i.e., 仮想ページ番号)となる.
///
/// 匿名マッピングはカーネルによってゼロ埋めされるため、
/// `AllocPolicy::zero_fill`の指定に関わらず、返されるunit群は常にゼロである.
///
/// `AllocPolicy::may_reclaim`が`false`の場合には`MAP_NORESERVE`付きで、
/// `true`の場合には`MAP_POPULATE`付きでマッピングが行われる(Linuxのみ).
#[derive(Debug)]
pub struct MmapBlockSource {
    unit_size: usize,
    limit_units: Option<usize>,
    mapped_units: AtomicUsize,
}
impl MmapBlockSource {
    /// 新しい`MmapBlockSource`インスタンスを生成する.
    ///
    /// # Errors
    ///
    /// ページサイズの取得に失敗した場合には、種類が`ErrorKind::Other`のエラーが返される.
    pub fn new() -> Result<Self> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            return Err(track!(Error::from(io::Error::last_os_error())));
        }
        let unit_size = page_size as usize;
        track_assert!(
            unit_size.is_power_of_two(),
            ErrorKind::Other,
            "page_size={}",
            unit_size
        );
        Ok(MmapBlockSource {
            unit_size,
            limit_units: None,
            mapped_units: AtomicUsize::new(0),
        })
    }

    /// 同時にマッピング可能なunit数の上限を設定する.
    ///
    /// 上限を超える要求は、`mmap(2)`を呼び出すことなく失敗する.
    ///
    /// デフォルト値は`None`(上限なし).
    pub fn set_limit_units(&mut self, limit: Option<usize>) {
        self.limit_units = limit;
    }

    /// unitサイズ(バイト単位)を返す.
    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// 現在マッピング中のunitの数を返す.
    pub fn mapped_units(&self) -> usize {
        self.mapped_units.load(Ordering::SeqCst)
    }

    fn reserve(&self, units: usize) -> bool {
        let limit = self.limit_units;
        self.mapped_units
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let next = current.checked_add(units)?;
                match limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .is_ok()
    }

    fn unreserve(&self, units: usize) {
        self.mapped_units.fetch_sub(units, Ordering::SeqCst);
    }
}
impl BlockSource for MmapBlockSource {
    fn try_alloc_grouping(&self, order: Order, policy: AllocPolicy) -> Option<UnitId> {
        let units = order.units();
        if !self.reserve(units) {
            return None;
        }

        let len = units * self.unit_size;
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | policy_flags(policy),
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            self.unreserve(units);
            return None;
        }
        Some(UnitId::new(addr as u64 / self.unit_size as u64))
    }

    fn free_grouping(&self, start: UnitId, order: Order) {
        let units = order.units();
        let addr = (start.as_u64() * self.unit_size as u64) as usize as *mut libc::c_void;
        let status = unsafe { libc::munmap(addr, units * self.unit_size) };
        assert_eq!(
            status,
            0,
            "munmap failed: start={}, order={}, error={}",
            start,
            order,
            io::Error::last_os_error()
        );
        self.unreserve(units);
    }
}
impl AddressResolver for MmapBlockSource {
    fn resolve(&self, unit: UnitId) -> Address {
        Address::new(unit.as_u64() * self.unit_size as u64)
    }
}

#[cfg(target_os = "linux")]
fn policy_flags(policy: AllocPolicy) -> libc::c_int {
    if policy.may_reclaim {
        libc::MAP_POPULATE
    } else {
        libc::MAP_NORESERVE
    }
}
#[cfg(not(target_os = "linux"))]
fn policy_flags(_policy: AllocPolicy) -> libc::c_int {
    0
}
