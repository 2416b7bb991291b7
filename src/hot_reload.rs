//! 脚本文件监视
//!
//! 监视脚本目录，把变更的文件映射回已加载的脚本并以保留状态的方式重载。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::core::{BinderError, BinderResult};
use crate::language::JavaScriptLanguage;
use crate::script::{ReloadReport, Script, ScriptId};

/// 把新建和修改事件中的路径转发给监视器；监视出错只记录日志
fn forward_event(res: notify::Result<notify::Event>, tx: &Sender<PathBuf>) {
    match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                for p in event.paths {
                    let _ = tx.send(p);
                }
            }
        }
        Err(err) => {
            tracing::warn!(target: "binder.watch", "Watcher error: {}", err);
        }
    }
}

pub struct ScriptWatcher {
    rx: Receiver<PathBuf>,
    _watcher: RecommendedWatcher,
}

impl ScriptWatcher {
    pub fn watch_dir(path: impl AsRef<Path>) -> BinderResult<Self> {
        let (tx, rx) = unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| forward_event(res, &tx),
            Config::default(),
        )?;
        watcher.watch(path.as_ref(), RecursiveMode::Recursive)?;
        tracing::info!(target: "binder.watch", "Watching {}", path.as_ref().display());
        Ok(Self {
            rx,
            _watcher: watcher,
        })
    }

    pub fn poll(&self) -> Option<PathBuf> {
        self.rx.try_recv().ok()
    }

    /// 取出所有待处理的变更（去重）
    pub fn drain(&self) -> BTreeSet<PathBuf> {
        self.rx.try_iter().collect()
    }
}

/// 脚本路径是否指向变更的文件
fn path_matches(script_path: &str, changed: &Path) -> bool {
    if script_path.is_empty() {
        return false;
    }
    let script_path = Path::new(script_path);
    changed == script_path || changed.ends_with(script_path)
}

impl JavaScriptLanguage {
    /// 路径与给定文件对应的脚本
    pub fn scripts_for_path(&self, changed: &Path) -> Vec<Arc<Script>> {
        self.scripts()
            .into_iter()
            .filter(|script| path_matches(&script.script_path(), changed))
            .collect()
    }

    /// 重读变更文件并重载对应脚本
    ///
    /// 编译失败的脚本保留旧类，错误随结果一并返回。
    pub fn reload_changed(
        &self,
        watcher: &ScriptWatcher,
    ) -> Vec<(ScriptId, BinderResult<ReloadReport>)> {
        let mut results = Vec::new();
        for changed in watcher.drain() {
            for script in self.scripts_for_path(&changed) {
                results.push((script.id(), reload_from_file(&script, &changed)));
            }
        }
        results
    }
}

fn reload_from_file(script: &Arc<Script>, path: &Path) -> BinderResult<ReloadReport> {
    let source = std::fs::read_to_string(path)?;
    script.set_source_code(source);
    let result = script.reload(true);
    if let Err(err) = &result {
        tracing::warn!(target: "binder.watch", "Reload of {} failed: {}", path.display(), err);
    }
    result.map_err(|err| match err {
        BinderError::Compile(compile) => BinderError::ReloadFailure(compile),
        other => other,
    })
}
