//! 热重载协调
//!
//! 重载在调用线程的 Binder 中重新编译源码。编译失败时保留旧类，
//! 已有实例不受影响；成功时版本号加一，本线程上的实例立即迁移，
//! 其他线程上的实例在所属线程下次访问时迁移。
//!
//! 迁移时先取旧值快照，新值构造完成并写回仍存在的属性后，
//! 才替换绑定指向并释放旧值。

use std::sync::Arc;

use super::instance::ScriptInstance;
use super::object::{CompiledClass, Script};
use super::value::ScriptValue;
use crate::binder::{Binder, BinderRegistry, ClassHandle};
use crate::classdb::{ClassDescriptor, VariantType};
use crate::core::{BinderError, BinderResult};

/// 一次重载的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// 重载后的版本号
    pub version: u64,
    /// 源码未变，未做任何事
    pub unchanged: bool,
    /// 本线程上已迁移的实例
    pub migrated: usize,
    /// 迁移失败、保留旧值的实例
    pub failed: usize,
    /// 属于其他线程、等待其线程迁移的实例
    pub deferred: usize,
    /// 刷新的占位实例
    pub placeholders: usize,
}

/// 热重载协调器
pub struct ReloadCoordinator<'a> {
    registry: &'a BinderRegistry,
}

impl<'a> ReloadCoordinator<'a> {
    pub fn new(registry: &'a BinderRegistry) -> Self {
        Self { registry }
    }

    /// 重载脚本
    ///
    /// 之前从未编译成功时，编译失败返回 `Compile`；已有可用类时返回
    /// `ReloadFailure`，旧类和实例保持不变。`keep_state` 为 true 且源码
    /// 未变时不做任何事。
    pub fn reload(&self, script: &Arc<Script>, keep_state: bool) -> BinderResult<ReloadReport> {
        let binder = self.registry.get_or_create_binder_for_current_thread()?;
        binder.drain_reclaimed();
        let source = script.effective_source()?;

        let _guard = script.reload_lock.lock();
        let previous = script.compiled();
        if keep_state {
            if let Some(previous) = &previous {
                let current = binder
                    .class_for(script.id())
                    .map(|class| class.version() == previous.version)
                    .unwrap_or(false);
                if previous.source == source && current {
                    tracing::debug!(
                        target: "binder.reload",
                        "{} unchanged, reload skipped",
                        script.id()
                    );
                    return Ok(ReloadReport {
                        version: previous.version,
                        unchanged: true,
                        ..Default::default()
                    });
                }
            }
        }

        let path = script.script_path();
        let mut class = match binder.compile_source(&script.declared_class_name(), &source, &path) {
            Ok(class) => class,
            Err(BinderError::Compile(err)) => {
                script.record_error(err.clone());
                return Err(match previous {
                    Some(previous) => {
                        tracing::warn!(
                            target: "binder.reload",
                            "Reload of {} failed, keeping version {}: {}",
                            script.id(),
                            previous.version,
                            err
                        );
                        BinderError::ReloadFailure(err)
                    }
                    None => {
                        tracing::warn!(target: "binder.reload", "Compile of {} failed: {}", script.id(), err);
                        BinderError::Compile(err)
                    }
                });
            }
            Err(other) => return Err(other),
        };

        let version = previous.as_ref().map(|p| p.version + 1).unwrap_or(1);
        class.version = version;
        script.install_compiled(
            CompiledClass {
                version,
                source,
                class_name: class.descriptor.class_name.clone(),
                path,
                descriptor: class.descriptor.clone(),
            },
            keep_state,
        );
        binder.register_class(script.id(), class.clone());

        let mut report = ReloadReport {
            version,
            ..Default::default()
        };
        for instance in script.live_instances() {
            if instance.binder() != binder.handle() {
                report.deferred += 1;
                continue;
            }
            match migrate(&binder, &instance, &class, keep_state) {
                Ok(_) => report.migrated += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: "binder.reload",
                        "Instance {} kept previous class: {}",
                        instance.object_id(),
                        err
                    );
                }
            }
        }
        report.placeholders = script.update_exports();

        tracing::info!(
            target: "binder.reload",
            "Reloaded {} as '{}' v{} ({} migrated, {} deferred, {} placeholders)",
            script.id(),
            class.class_name(),
            version,
            report.migrated,
            report.deferred,
            report.placeholders
        );
        Ok(report)
    }

    /// 把实例对齐到脚本的最新版本（在实例所属线程上调用）
    ///
    /// 本上下文编译最新源码失败时实例保留旧类。
    pub(crate) fn sync_instance(binder: &Binder, instance: &ScriptInstance) -> BinderResult<()> {
        let script = instance.script();
        if instance.class_version() >= script.version() {
            return Ok(());
        }
        match binder.ensure_class(script) {
            Ok(class) => {
                let keep_state = script.keep_state_on_migrate(instance.class_version());
                migrate(binder, instance, &class, keep_state)?;
            }
            Err(err) => {
                tracing::warn!(
                    target: "binder.reload",
                    "Binder {} could not compile v{} of {}: {}",
                    binder.id(),
                    script.version(),
                    script.id(),
                    err
                );
            }
        }
        Ok(())
    }
}

/// 把实例迁移到新类；已是该版本时返回 false
pub(crate) fn migrate(
    binder: &Binder,
    instance: &ScriptInstance,
    class: &ClassHandle,
    keep_state: bool,
) -> BinderResult<bool> {
    let inner = instance.inner();
    let mut state = inner.state.lock();
    if state.version == class.version() {
        return Ok(false);
    }

    let old_slot = inner.binding.slot();
    let snapshot = if keep_state {
        snapshot_state(binder, old_slot, &state.descriptor)?
    } else {
        Vec::new()
    };

    let new_slot = binder.handle().alloc_slot();
    binder.construct(class, new_slot)?;
    if let Err(err) = restore_state(binder, new_slot, class.descriptor(), snapshot) {
        binder.release_slot(new_slot);
        return Err(err);
    }

    let previous = inner.binding.swap_slot(new_slot);
    state.version = class.version();
    state.descriptor = class.descriptor().clone();
    drop(state);
    binder.release_slot(previous);
    Ok(true)
}

/// 旧描述符中声明、且脚本侧确有值的属性
fn snapshot_state(
    binder: &Binder,
    slot: u64,
    descriptor: &ClassDescriptor,
) -> BinderResult<Vec<(String, VariantType, ScriptValue)>> {
    let mut snapshot = Vec::with_capacity(descriptor.properties.len());
    for property in &descriptor.properties {
        if let Some(value) = binder.get_value(slot, &property.name)? {
            snapshot.push((property.name.clone(), property.ty, value));
        }
    }
    Ok(snapshot)
}

/// 写回新描述符中仍存在且类型兼容的属性，其余丢弃
fn restore_state(
    binder: &Binder,
    slot: u64,
    descriptor: &ClassDescriptor,
    snapshot: Vec<(String, VariantType, ScriptValue)>,
) -> BinderResult<()> {
    for (name, old_ty, value) in snapshot {
        match descriptor.property(&name) {
            Some(property) if property.ty.is_compatible_with(old_ty) => {
                let value = property.ty.coerce(value);
                if !binder.set_value(slot, &name, &value)? {
                    tracing::debug!(target: "binder.reload", "'{}' rejected on restore", name);
                }
            }
            Some(property) => {
                tracing::debug!(
                    target: "binder.reload",
                    "'{}' changed type {:?} -> {:?}, value dropped",
                    name,
                    old_ty,
                    property.ty
                );
            }
            None => {
                tracing::debug!(target: "binder.reload", "'{}' removed, value dropped", name);
            }
        }
    }
    Ok(())
}
