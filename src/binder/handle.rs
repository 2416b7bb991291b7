//! Binder 共享句柄
//!
//! [`Binder`](super::Binder) 本身持有引擎上下文，只能留在创建它的线程上。
//! 需要跨线程可见的部分（身份、存活标记、已编译类版本、绑定数据表）
//! 放在 `BinderHandle` 中，由注册表和脚本实例共享。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::binding::{BindingData, BindingTable, Release};
use crate::core::{BinderError, BinderResult};
use crate::script::ScriptId;

/// Binder 的线程安全句柄
#[derive(Clone)]
pub struct BinderHandle {
    inner: Arc<BinderShared>,
}

struct BinderShared {
    id: u64,
    registry_id: u64,
    thread: ThreadId,
    thread_name: Option<String>,
    main: bool,
    alive: AtomicBool,
    /// 脚本 -> 本上下文中已编译的类版本
    compiled: Mutex<HashMap<ScriptId, u64>>,
    bindings: BindingTable,
    next_slot: AtomicU64,
    /// 其他线程上归零的绑定，等所属线程下次进入时释放
    reclaim_tx: Sender<u64>,
    reclaim_rx: Receiver<u64>,
    /// 已释放脚本的类，等所属线程下次进入时注销
    unregister_tx: Sender<ScriptId>,
    unregister_rx: Receiver<ScriptId>,
}

impl BinderHandle {
    /// 在当前线程上创建句柄
    pub(crate) fn new(id: u64, registry_id: u64, main: bool) -> Self {
        let current = thread::current();
        let (reclaim_tx, reclaim_rx) = crossbeam_channel::unbounded();
        let (unregister_tx, unregister_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(BinderShared {
                id,
                registry_id,
                thread: current.id(),
                thread_name: current.name().map(str::to_string),
                main,
                alive: AtomicBool::new(true),
                compiled: Mutex::new(HashMap::new()),
                bindings: BindingTable::new(),
                next_slot: AtomicU64::new(1),
                reclaim_tx,
                reclaim_rx,
                unregister_tx,
                unregister_rx,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn registry_id(&self) -> u64 {
        self.inner.registry_id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.inner.thread
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.inner.thread_name.as_deref()
    }

    pub fn is_main(&self) -> bool {
        self.inner.main
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// 线程亲和性检查
    ///
    /// 上下文已拆除时返回 `ContextGone`，调用线程不是所属线程时返回
    /// `ThreadAffinityViolation`。
    pub fn check_affinity(&self) -> BinderResult<()> {
        if !self.is_alive() {
            return Err(BinderError::ContextGone);
        }
        let caller = thread::current().id();
        if caller != self.inner.thread {
            return Err(BinderError::ThreadAffinityViolation {
                owner: self.inner.thread,
                caller,
            });
        }
        Ok(())
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.inner.bindings
    }

    /// 该上下文中已编译的脚本类版本
    pub fn compiled_version(&self, script: ScriptId) -> Option<u64> {
        self.inner.compiled.lock().get(&script).copied()
    }

    pub fn has_class(&self, script: ScriptId) -> bool {
        self.inner.compiled.lock().contains_key(&script)
    }

    pub fn compiled_scripts(&self) -> Vec<ScriptId> {
        self.inner.compiled.lock().keys().copied().collect()
    }

    pub(crate) fn record_class(&self, script: ScriptId, version: u64) {
        self.inner.compiled.lock().insert(script, version);
    }

    pub(crate) fn forget_class(&self, script: ScriptId) {
        self.inner.compiled.lock().remove(&script);
    }

    pub(crate) fn alloc_slot(&self) -> u64 {
        self.inner.next_slot.fetch_add(1, Ordering::Relaxed)
    }

    /// 标记为已拆除，之后所有经由此句柄的调用返回 `ContextGone`
    pub(crate) fn invalidate(&self) {
        if self.inner.alive.swap(false, Ordering::AcqRel) {
            let dropped = self.inner.bindings.clear();
            self.inner.compiled.lock().clear();
            tracing::debug!(
                target: "binder",
                "Binder {} invalidated ({} bindings dropped)",
                self.inner.id,
                dropped
            );
        }
    }

    /// 释放一个绑定引用，归零时回收槽位。返回是否发生了回收。
    pub(crate) fn release_binding(&self, data: &Arc<BindingData>) -> bool {
        match self.inner.bindings.release(data) {
            Release::Reclaim(slot) => {
                self.reclaim_slot(slot);
                true
            }
            Release::Retained(_) | Release::Missing => false,
        }
    }

    /// 强制回收绑定
    pub(crate) fn free_binding(&self, data: &Arc<BindingData>) -> bool {
        match self.inner.bindings.free(data) {
            Some(slot) => {
                self.reclaim_slot(slot);
                true
            }
            None => false,
        }
    }

    /// 在所属线程上立即释放槽位，否则排队等所属线程处理
    pub(crate) fn reclaim_slot(&self, slot: u64) {
        if !self.is_alive() {
            return;
        }
        if self.is_current_thread() {
            if let Some(binder) = super::registry::thread_binder(self.registry_id(), self.id()) {
                binder.release_slot(slot);
                return;
            }
        }
        // 接收端与发送端同属本句柄，发送不会失败
        let _ = self.inner.reclaim_tx.send(slot);
    }

    pub(crate) fn take_pending_reclaims(&self) -> Vec<u64> {
        self.inner.reclaim_rx.try_iter().collect()
    }

    pub fn pending_reclaims(&self) -> usize {
        self.inner.reclaim_rx.len()
    }

    /// 脚本已释放，注销它在本上下文中的类
    ///
    /// 所属线程上立即注销；其他线程上先从版本表中移除，引擎侧的类排队
    /// 等所属线程处理。
    pub(crate) fn release_class(&self, script: ScriptId) {
        if !self.is_alive() {
            return;
        }
        if self.is_current_thread() {
            if let Some(binder) = super::registry::thread_binder(self.registry_id(), self.id()) {
                binder.unregister_class(script);
                return;
            }
        }
        self.forget_class(script);
        let _ = self.inner.unregister_tx.send(script);
    }

    pub(crate) fn take_pending_unregisters(&self) -> Vec<ScriptId> {
        self.inner.unregister_rx.try_iter().collect()
    }

    pub fn pending_unregisters(&self) -> usize {
        self.inner.unregister_rx.len()
    }
}

impl PartialEq for BinderHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for BinderHandle {}

impl fmt::Debug for BinderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinderHandle")
            .field("id", &self.inner.id)
            .field("thread", &self.inner.thread)
            .field("main", &self.inner.main)
            .field("alive", &self.is_alive())
            .finish()
    }
}
