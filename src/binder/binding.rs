//! 绑定数据表
//!
//! 每个 Binder 持有一张 [`BindingTable`]，记录宿主对象当前对应的引擎槽位
//! 以及宿主侧引用计数。计数不会小于零；归零时恰好回收一次并移除记录，
//! 同一标识之后再绑定会得到全新的记录。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::handle::BinderHandle;
use crate::host::ObjectId;

/// 单个宿主对象在某个 Binder 中的绑定记录
pub struct BindingData {
    object_id: ObjectId,
    generation: u64,
    slot: AtomicU64,
    refcount: AtomicUsize,
    reclaimed: AtomicBool,
    claimed: AtomicBool,
}

impl BindingData {
    fn new(object_id: ObjectId, generation: u64, slot: u64) -> Self {
        Self {
            object_id,
            generation,
            slot: AtomicU64::new(slot),
            refcount: AtomicUsize::new(0),
            reclaimed: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// 区分同一标识的先后绑定
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 当前持有脚本侧值的引擎槽位
    pub fn slot(&self) -> u64 {
        self.slot.load(Ordering::Acquire)
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn is_reclaimed(&self) -> bool {
        self.reclaimed.load(Ordering::Acquire)
    }

    /// 是否已被某个脚本实例占用
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// 由脚本实例占用；已被占用时返回 false
    pub(crate) fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn unclaim(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    /// 增加一个宿主侧引用，返回新计数；已回收的记录返回 `None`
    pub fn acquire(&self) -> Option<usize> {
        if self.is_reclaimed() {
            return None;
        }
        Some(self.refcount.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// 减少一个引用，不会小于零
    fn release(&self) -> Option<usize> {
        self.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    /// 切换到新槽位，返回旧槽位
    pub(crate) fn swap_slot(&self, slot: u64) -> u64 {
        self.slot.swap(slot, Ordering::AcqRel)
    }
}

impl fmt::Debug for BindingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingData")
            .field("object_id", &self.object_id)
            .field("generation", &self.generation)
            .field("slot", &self.slot())
            .field("refcount", &self.refcount())
            .field("reclaimed", &self.is_reclaimed())
            .field("claimed", &self.is_claimed())
            .finish()
    }
}

/// 释放引用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// 仍有其他引用
    Retained(usize),
    /// 计数归零，需在引擎中释放该槽位
    Reclaim(u64),
    /// 无可释放（已回收或计数已为零）
    Missing,
}

/// 绑定数据表（每个 Binder 一张）
#[derive(Default)]
pub struct BindingTable {
    entries: Mutex<HashMap<ObjectId, Arc<BindingData>>>,
    next_generation: AtomicU64,
    created: AtomicU64,
    reclaimed: AtomicU64,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取 `object_id` 的有效记录，不存在时以 `slot` 新建；新建时返回 true
    pub fn bind(&self, object_id: ObjectId, slot: u64) -> (Arc<BindingData>, bool) {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&object_id) {
            if !existing.is_reclaimed() {
                return (existing.clone(), false);
            }
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let data = Arc::new(BindingData::new(object_id, generation, slot));
        entries.insert(object_id, data.clone());
        self.created.fetch_add(1, Ordering::Relaxed);
        (data, true)
    }

    pub fn get(&self, object_id: ObjectId) -> Option<Arc<BindingData>> {
        self.entries.lock().get(&object_id).cloned()
    }

    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.entries.lock().contains_key(&object_id)
    }

    /// 释放一个引用，归零时回收
    pub fn release(&self, data: &Arc<BindingData>) -> Release {
        match data.release() {
            None => {
                tracing::warn!(
                    target: "binder",
                    "Binding for {} released with no outstanding references",
                    data.object_id()
                );
                Release::Missing
            }
            Some(remaining) if remaining > 0 => Release::Retained(remaining),
            Some(_) => self
                .reclaim(data, false)
                .map(Release::Reclaim)
                .unwrap_or(Release::Missing),
        }
    }

    /// 无视计数强制回收（宿主显式释放绑定）
    pub fn free(&self, data: &Arc<BindingData>) -> Option<u64> {
        self.reclaim(data, true)
    }

    fn reclaim(&self, data: &Arc<BindingData>, force: bool) -> Option<u64> {
        let mut entries = self.entries.lock();
        // 归零与加锁之间可能被重新引用
        if !force && data.refcount() != 0 {
            return None;
        }
        if data.reclaimed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let id = data.object_id();
        if entries
            .get(&id)
            .map(|current| Arc::ptr_eq(current, data))
            .unwrap_or(false)
        {
            entries.remove(&id);
        }
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
        Some(data.slot())
    }

    /// 全部标记为已回收；Binder 拆除时引擎值随上下文一起销毁
    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        for data in entries.values() {
            data.reclaimed.store(true, Ordering::Release);
        }
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 累计创建的记录数
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// 累计回收的记录数
    pub fn reclaimed_count(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

/// `alloc_instance_binding_data` 返回的不透明句柄
#[derive(Clone)]
pub struct BindingToken {
    binder: BinderHandle,
    data: Arc<BindingData>,
}

impl BindingToken {
    pub(crate) fn new(binder: BinderHandle, data: Arc<BindingData>) -> Self {
        Self { binder, data }
    }

    pub fn binder(&self) -> &BinderHandle {
        &self.binder
    }

    pub fn data(&self) -> &Arc<BindingData> {
        &self.data
    }

    pub fn object_id(&self) -> ObjectId {
        self.data.object_id()
    }

    /// 记录与所属 Binder 均有效
    pub fn is_live(&self) -> bool {
        self.binder.is_alive() && !self.data.is_reclaimed()
    }

    pub fn same_binding(&self, other: &BindingToken) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for BindingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingToken")
            .field("binder", &self.binder.id())
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bind_reuses_live_record() {
        let table = BindingTable::new();
        let (first, created) = table.bind(ObjectId(1), 10);
        assert!(created);
        let (second, created) = table.bind(ObjectId(1), 11);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.slot(), 10);
    }

    #[test]
    fn test_release_never_goes_negative() {
        let table = BindingTable::new();
        let (data, _) = table.bind(ObjectId(7), 1);
        assert_eq!(table.release(&data), Release::Missing);
        assert_eq!(data.refcount(), 0);
        assert_eq!(table.reclaimed_count(), 0);
    }

    #[test]
    fn test_free_is_idempotent() {
        let table = BindingTable::new();
        let (data, _) = table.bind(ObjectId(3), 5);
        data.acquire();
        assert_eq!(table.free(&data), Some(5));
        assert_eq!(table.free(&data), None);
        assert_eq!(table.reclaimed_count(), 1);
        assert!(data.acquire().is_none());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let table = BindingTable::new();
        let (data, _) = table.bind(ObjectId(4), 1);
        assert!(data.claim());
        assert!(!data.claim());
        data.unclaim();
        assert!(!data.is_claimed());
        assert!(data.claim());
    }

    #[test]
    fn test_swap_slot() {
        let table = BindingTable::new();
        let (data, _) = table.bind(ObjectId(9), 1);
        assert_eq!(data.swap_slot(2), 1);
        assert_eq!(data.slot(), 2);
    }

    #[test]
    fn test_clear_marks_all_reclaimed() {
        let table = BindingTable::new();
        let (a, _) = table.bind(ObjectId(1), 1);
        let (b, _) = table.bind(ObjectId(2), 2);
        assert_eq!(table.clear(), 2);
        assert!(a.is_reclaimed() && b.is_reclaimed());
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn balanced_references_reclaim_exactly_once(n in 1usize..64, reuse in 0u64..4) {
            let table = BindingTable::new();
            let id = ObjectId(42);
            let (data, _) = table.bind(id, 100);

            for _ in 0..n {
                prop_assert!(data.acquire().is_some());
            }
            let mut reclaims = Vec::new();
            for _ in 0..n {
                if let Release::Reclaim(slot) = table.release(&data) {
                    reclaims.push(slot);
                }
            }
            prop_assert_eq!(reclaims, vec![100]);
            prop_assert_eq!(table.reclaimed_count(), 1);
            prop_assert!(!table.contains(id));

            // 同一标识重新绑定，不残留旧记录
            for round in 0..reuse {
                let (fresh, created) = table.bind(id, 200 + round);
                prop_assert!(created);
                prop_assert_eq!(fresh.refcount(), 0);
                prop_assert_eq!(fresh.slot(), 200 + round);
                prop_assert!(fresh.generation() > data.generation());
                fresh.acquire();
                prop_assert_eq!(table.release(&fresh), Release::Reclaim(200 + round));
            }
            prop_assert_eq!(table.len(), 0);
            prop_assert_eq!(table.reclaimed_count(), 1 + reuse);
        }
    }
}
