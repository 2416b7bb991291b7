//! Binder 注册表
//!
//! 线程 -> Binder 的映射。`Binder` 本身存放在线程本地存储中，注册表只保存
//! 可跨线程共享的 [`BinderHandle`]；映射表的锁只在插入和移除时持有。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use super::context::Binder;
use super::handle::BinderHandle;
use crate::classdb::ClassDescriptorTable;
use crate::config::BinderConfig;
use crate::core::{BinderError, BinderResult};
use crate::script::ScriptId;

thread_local! {
    /// 注册表编号 -> 本线程的 Binder
    static THREAD_BINDERS: RefCell<HashMap<u64, Rc<Binder>>> = RefCell::new(HashMap::new());
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// 本线程上属于指定注册表、且编号匹配的 Binder
pub(crate) fn thread_binder(registry_id: u64, binder_id: u64) -> Option<Rc<Binder>> {
    THREAD_BINDERS
        .try_with(|binders| {
            binders
                .try_borrow()
                .ok()
                .and_then(|map| map.get(&registry_id).cloned())
        })
        .ok()
        .flatten()
        .filter(|binder| binder.id() == binder_id)
}

pub(crate) struct RegistryInner {
    id: u64,
    config: BinderConfig,
    classes: Arc<ClassDescriptorTable>,
    binders: Mutex<HashMap<ThreadId, BinderHandle>>,
    main: RwLock<Option<BinderHandle>>,
    execution_enabled: AtomicBool,
    next_binder_id: AtomicU64,
}

impl RegistryInner {
    /// Binder 析构时调用
    pub(crate) fn deregister(&self, handle: &BinderHandle) {
        let mut binders = self.binders.lock();
        let owned = binders
            .get(&handle.thread_id())
            .map(|current| current == handle)
            .unwrap_or(false);
        if owned {
            binders.remove(&handle.thread_id());
        }
    }
}

/// 线程 -> Binder 注册表
///
/// 克隆得到的是同一个注册表。
#[derive(Clone)]
pub struct BinderRegistry {
    inner: Arc<RegistryInner>,
}

impl BinderRegistry {
    pub fn new(config: BinderConfig, classes: Arc<ClassDescriptorTable>) -> Self {
        let execution_enabled = config.script_execution_enabled;
        Self {
            inner: Arc::new(RegistryInner {
                id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
                config,
                classes,
                binders: Mutex::new(HashMap::new()),
                main: RwLock::new(None),
                execution_enabled: AtomicBool::new(execution_enabled),
                next_binder_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &BinderConfig {
        &self.inner.config
    }

    pub fn class_table(&self) -> &Arc<ClassDescriptorTable> {
        &self.inner.classes
    }

    /// 是否允许执行脚本（工具模式下关闭）
    pub fn execution_enabled(&self) -> bool {
        self.inner.execution_enabled.load(Ordering::Acquire)
    }

    pub fn set_execution_enabled(&self, enabled: bool) {
        self.inner.execution_enabled.store(enabled, Ordering::Release);
        tracing::info!(
            target: "binder",
            "Script execution {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// 在调用线程上创建主 Binder
    ///
    /// 已存在且有效时直接返回；主 Binder 属于其他线程时报错。
    pub fn init_main(&self) -> BinderResult<BinderHandle> {
        if let Some(main) = self.get_main_binder() {
            if main.is_current_thread() {
                return Ok(main);
            }
            return Err(BinderError::ThreadAffinityViolation {
                owner: main.thread_id(),
                caller: thread::current().id(),
            });
        }
        if let Some(existing) = self.current_binder() {
            return Err(BinderError::ContextUnavailable(format!(
                "thread already owns binder {}",
                existing.id()
            )));
        }
        let binder = self.create_binder(true)?;
        let handle = binder.handle().clone();
        *self.inner.main.write() = Some(handle.clone());
        Ok(handle)
    }

    /// 取当前线程的 Binder，没有时创建
    pub fn get_or_create_binder_for_current_thread(&self) -> BinderResult<Rc<Binder>> {
        match self.current_binder() {
            Some(binder) => Ok(binder),
            None => self.create_binder(false),
        }
    }

    /// 当前线程的 Binder
    pub fn current_binder(&self) -> Option<Rc<Binder>> {
        THREAD_BINDERS
            .try_with(|binders| {
                binders
                    .try_borrow()
                    .ok()
                    .and_then(|map| map.get(&self.inner.id).cloned())
            })
            .ok()
            .flatten()
            .filter(|binder| binder.handle().is_alive())
    }

    pub fn get_main_binder(&self) -> Option<BinderHandle> {
        self.inner
            .main
            .read()
            .clone()
            .filter(|main| main.is_alive())
    }

    pub fn get_binder_for_thread(&self, thread: ThreadId) -> Option<BinderHandle> {
        self.inner.binders.lock().get(&thread).cloned()
    }

    pub fn is_main_thread(&self) -> bool {
        self.get_main_binder()
            .map(|main| main.is_current_thread())
            .unwrap_or(false)
    }

    pub fn binders(&self) -> Vec<BinderHandle> {
        self.inner.binders.lock().values().cloned().collect()
    }

    /// 已编译了指定脚本的 Binder
    pub fn binders_with_class(&self, script: ScriptId) -> Vec<BinderHandle> {
        self.binders()
            .into_iter()
            .filter(|binder| binder.has_class(script))
            .collect()
    }

    pub fn binder_count(&self) -> usize {
        self.inner.binders.lock().len()
    }

    fn create_binder(&self, main: bool) -> BinderResult<Rc<Binder>> {
        let id = self.inner.next_binder_id.fetch_add(1, Ordering::Relaxed);
        let handle = BinderHandle::new(id, self.inner.id, main);
        let binder = Rc::new(Binder::new(
            handle.clone(),
            Arc::downgrade(&self.inner),
            &self.inner.config,
            self.inner.classes.clone(),
        )?);

        let previous = THREAD_BINDERS
            .try_with(|binders| {
                binders
                    .try_borrow_mut()
                    .map(|mut map| map.insert(self.inner.id, binder.clone()))
                    .map_err(|_| ())
            })
            .map_err(|_| BinderError::ContextUnavailable("thread is shutting down".into()))?
            .map_err(|_| BinderError::ContextUnavailable("binder table is busy".into()))?;
        // 旧 Binder 在借用结束后释放
        drop(previous);

        self.inner
            .binders
            .lock()
            .insert(handle.thread_id(), handle);
        Ok(binder)
    }

    /// 拆除当前线程的 Binder
    ///
    /// 主 Binder 不能通过此方法拆除。拆除后该上下文中的实例访问均返回
    /// `ContextGone`。
    pub fn teardown_current_thread(&self) -> bool {
        match self.current_binder() {
            Some(binder) if binder.is_main() => {
                tracing::warn!(target: "binder", "Refusing to tear down the main binder");
                false
            }
            Some(binder) => {
                drop(binder);
                self.remove_thread_binder()
            }
            None => false,
        }
    }

    fn remove_thread_binder(&self) -> bool {
        let removed = THREAD_BINDERS
            .try_with(|binders| {
                binders
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut map| map.remove(&self.inner.id))
            })
            .ok()
            .flatten();
        match removed {
            Some(binder) => {
                // 先失效并注销，其他线程持有的实例立即可见
                binder.handle().invalidate();
                self.inner.deregister(binder.handle());
                drop(binder);
                true
            }
            None => false,
        }
    }

    /// 关闭注册表：拆除调用线程上的 Binder，其余 Binder 全部失效
    pub fn shutdown(&self) {
        self.remove_thread_binder();
        let handles: Vec<BinderHandle> = self.inner.binders.lock().drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.invalidate();
        }
        if let Some(main) = self.inner.main.write().take() {
            main.invalidate();
        }
        tracing::info!(
            target: "binder",
            "Registry {} shut down ({} remote binders invalidated)",
            self.inner.id,
            handles.len()
        );
    }
}

impl std::fmt::Debug for BinderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinderRegistry")
            .field("id", &self.inner.id)
            .field("binders", &self.binder_count())
            .field("execution_enabled", &self.execution_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BinderRegistry {
        BinderRegistry::new(
            BinderConfig::default(),
            Arc::new(ClassDescriptorTable::with_builtin_classes()),
        )
    }

    #[test]
    fn test_one_binder_per_thread() {
        let registry = registry();
        let first = registry.get_or_create_binder_for_current_thread().unwrap();
        let second = registry.get_or_create_binder_for_current_thread().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(registry.binder_count(), 1);

        let remote = registry.clone();
        let remote_id = std::thread::spawn(move || {
            let binder = remote.get_or_create_binder_for_current_thread().unwrap();
            binder.id()
        })
        .join()
        .unwrap();
        assert_ne!(remote_id, first.id());
    }

    #[test]
    fn test_thread_exit_deregisters() {
        let registry = registry();
        let remote = registry.clone();
        let handle = std::thread::spawn(move || {
            remote
                .get_or_create_binder_for_current_thread()
                .unwrap()
                .handle()
                .clone()
        })
        .join()
        .unwrap();
        assert!(!handle.is_alive());
        assert!(registry.get_binder_for_thread(handle.thread_id()).is_none());
    }

    #[test]
    fn test_main_binder_survives_teardown_request() {
        let registry = registry();
        let main = registry.init_main().unwrap();
        assert!(registry.is_main_thread());
        assert!(!registry.teardown_current_thread());
        assert!(main.is_alive());
        registry.shutdown();
        assert!(!main.is_alive());
        assert!(registry.get_main_binder().is_none());
    }

    #[test]
    fn test_teardown_worker_binder() {
        let registry = registry();
        let binder = registry.get_or_create_binder_for_current_thread().unwrap();
        let handle = binder.handle().clone();
        drop(binder);
        assert!(registry.teardown_current_thread());
        assert!(!handle.is_alive());
        assert_eq!(registry.binder_count(), 0);
    }
}
