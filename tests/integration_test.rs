use std::sync::Arc;

use crossbeam_channel::bounded;
use script_binder::{
    BinderConfig, BinderError, HostObject, InstanceSlot, JavaScriptLanguage, ScriptLanguage,
    ScriptValue,
};

const PLAYER: &str = r#"
class Player extends host.Node2D {
    static properties = {
        speed: { type: "int", default: 10 },
        title: "hero",
        tags: { type: "array", default: [] },
    };
    static signals = ["hit"];

    constructor() {
        super();
        this.steps = 0;
    }

    walk(n) {
        this.steps += n;
        return this.speed * n;
    }

    ready() {
        console.log("player ready", this.title);
    }
}
exports.default = Player;
"#;

fn language() -> JavaScriptLanguage {
    let language = JavaScriptLanguage::new(BinderConfig::default());
    language.init().unwrap();
    language
}

#[test]
fn test_compile_and_instantiate() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    assert!(script.is_valid());
    assert_eq!(script.class_name(), "Player");
    assert_eq!(script.get_instance_base_type().as_deref(), Some("Node2D"));
    assert!(script.has_method("walk"));
    assert!(script.has_script_signal("hit"));
    assert_eq!(script.get_script_property_list().len(), 3);

    let player = HostObject::new("Node2D");
    player.set_script(Some(script.clone())).unwrap();
    assert!(matches!(player.instance_slot(), InstanceSlot::Real(_)));
    assert!(script.instance_has(&player));

    assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(10)));
    assert_eq!(player.call("walk", &[ScriptValue::Int(3)]).unwrap(), ScriptValue::Int(30));
    assert!(player.set("speed", 2).unwrap());
    assert_eq!(player.call("walk", &[ScriptValue::Int(4)]).unwrap(), ScriptValue::Int(8));
    assert_eq!(player.get("steps").unwrap(), Some(ScriptValue::Int(7)));

    assert_eq!(player.call("ready", &[]).unwrap(), ScriptValue::Null);
    assert!(matches!(
        player.call("jump", &[]),
        Err(BinderError::MethodNotFound(_))
    ));
    assert!(player.has_method("walk").unwrap());
    assert!(!player.has_method("get_class").unwrap());
}

#[test]
fn test_instances_do_not_share_defaults() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let a = HostObject::new("Node2D");
    let b = HostObject::new("Node2D");
    a.set_script(Some(script.clone())).unwrap();
    b.set_script(Some(script.clone())).unwrap();

    a.set("tags", ScriptValue::Array(vec!["x".into()])).unwrap();
    assert_eq!(b.get("tags").unwrap(), Some(ScriptValue::Array(vec![])));
    assert_eq!(script.instance_count(), 2);
}

#[test]
fn test_binding_mismatch_and_double_bind() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();

    let resource = HostObject::new("Resource");
    let err = resource.set_script(Some(script.clone())).unwrap_err();
    assert!(matches!(err, BinderError::BindingMismatch { .. }));
    assert!(resource.script().is_none());
    assert!(!resource.has_script_instance());

    let player = HostObject::new("Node2D");
    let first = script.instance_create(&player).unwrap();
    assert!(matches!(
        script.instance_create(&player),
        Err(BinderError::AlreadyBound(_))
    ));
    drop(first);
    assert!(script.instance_create(&player).is_ok());
}

#[test]
fn test_second_script_cannot_take_a_held_binding() {
    let language = language();
    let player = language.load_script("player.jsx", PLAYER).unwrap();
    let enemy_source = r#"
class Enemy extends host.Node2D {
    static properties = { speed: { type: "int", default: 99 } };
    walk(n) { return -n; }
}
exports.default = Enemy;
"#;
    let enemy = language.load_script("enemy.jsx", enemy_source).unwrap();

    let host = HostObject::new("Node2D");
    let first = player.instance_create(&host).unwrap();
    assert!(matches!(
        enemy.instance_create(&host),
        Err(BinderError::AlreadyBound(_))
    ));
    assert!(!enemy.instance_has(&host));

    // 已有实例仍指向自己的对象
    assert_eq!(first.get_property("speed").unwrap(), Some(ScriptValue::Int(10)));
    assert_eq!(first.call_method("walk", &[ScriptValue::Int(2)]).unwrap(), ScriptValue::Int(20));
    assert_eq!(first.binding().refcount(), 1);
    assert!(first.binding().is_claimed());

    // 释放后第二个脚本可以绑定
    drop(first);
    let second = enemy.instance_create(&host).unwrap();
    assert_eq!(second.get_property("speed").unwrap(), Some(ScriptValue::Int(99)));
    assert_eq!(second.call_method("walk", &[ScriptValue::Int(2)]).unwrap(), ScriptValue::Int(-2));
}

#[test]
fn test_cross_thread_access_is_rejected() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let player = HostObject::new("Node2D");
    player.set_script(Some(script)).unwrap();

    let remote = player.clone();
    let result = std::thread::spawn(move || remote.get("speed"))
        .join()
        .unwrap();
    assert!(matches!(
        result,
        Err(BinderError::ThreadAffinityViolation { .. })
    ));
    // 所属线程上仍可正常访问
    assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(10)));
}

#[test]
fn test_reload_keeps_state() -> anyhow::Result<()> {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER)?;
    let player = HostObject::new("Node2D");
    player.set_script(Some(script.clone()))?;
    player.set("speed", 42)?;
    player.set("title", "villain")?;

    let updated = PLAYER
        .replace(r#"title: "hero","#, r#"title: "hero", armor: { type: "float", default: 1.5 },"#)
        .replace("return this.speed * n;", "return this.speed * n * 2;");
    script.set_source_code(updated);
    let report = script.reload(true)?;
    assert_eq!(report.version, 2);
    assert_eq!(report.migrated, 1);
    assert_eq!(report.deferred, 0);

    assert_eq!(player.get("speed")?, Some(ScriptValue::Int(42)));
    assert_eq!(player.get("title")?, Some(ScriptValue::String("villain".into())));
    assert_eq!(player.get("armor")?, Some(ScriptValue::Float(1.5)));
    assert_eq!(player.call("walk", &[ScriptValue::Int(1)])?, ScriptValue::Int(84));

    // 源码未变时跳过
    let report = script.reload(true)?;
    assert!(report.unchanged);
    assert_eq!(report.version, 2);
    Ok(())
}

#[test]
fn test_reload_without_keep_state_resets_values() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let player = HostObject::new("Node2D");
    player.set_script(Some(script.clone())).unwrap();
    player.set("speed", 42).unwrap();

    let report = script.reload(false).unwrap();
    assert_eq!(report.migrated, 1);
    assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(10)));
}

#[test]
fn test_reload_drops_removed_and_retyped_properties() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let player = HostObject::new("Node2D");
    player.set_script(Some(script.clone())).unwrap();
    player.set("speed", 42).unwrap();
    player.set("tags", ScriptValue::Array(vec!["a".into()])).unwrap();

    let updated = PLAYER
        .replace(r#"title: "hero","#, "")
        .replace(
            r#"tags: { type: "array", default: [] },"#,
            r#"tags: { type: "string", default: "none" },"#,
        );
    script.set_source_code(updated);
    script.reload(true).unwrap();

    let names: Vec<String> = player
        .get_property_list()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert!(!names.contains(&"title".to_string()));
    assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(42)));
    assert_eq!(
        player.get("tags").unwrap(),
        Some(ScriptValue::String("none".into()))
    );
}

#[test]
fn test_failed_reload_keeps_previous_class() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let player = HostObject::new("Node2D");
    player.set_script(Some(script.clone())).unwrap();
    player.set("speed", 5).unwrap();

    script.set_source_code(
        "class Broken extends host.Node2D {\n    walk(n) {\n        return n +* 2;\n    }\n}\nexports.default = Broken;",
    );
    let err = script.reload(true).unwrap_err();
    match err {
        BinderError::ReloadFailure(compile) => {
            assert_eq!(compile.path, "player.jsx");
            assert_eq!(compile.line, 3);
            assert!(compile.message.contains("SyntaxError"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(script.version(), 1);
    assert!(script.last_error().is_some());
    assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(5)));
    assert_eq!(player.call("walk", &[ScriptValue::Int(2)]).unwrap(), ScriptValue::Int(10));

    // 新实例仍使用旧类
    let other = HostObject::new("Node2D");
    other.set_script(Some(script.clone())).unwrap();
    assert_eq!(other.get("speed").unwrap(), Some(ScriptValue::Int(10)));
}

#[test]
fn test_syntax_error_reports_exact_line() {
    let language = language();
    let broken = PLAYER.replace("this.steps += n;", "this.steps += ;");
    assert_eq!(broken.lines().nth(15).map(str::trim), Some("this.steps += ;"));

    let err = language.load_script("player.jsx", &broken).unwrap_err();
    let compile = err.compile_error().unwrap();
    assert_eq!(compile.path, "player.jsx");
    assert_eq!(compile.line, 16);
    assert!(compile.column >= 1);
}

#[test]
fn test_first_compile_failure_is_not_a_reload_failure() {
    let language = language();
    let err = language
        .load_script("bad.jsx", "exports.default = 42;")
        .unwrap_err();
    assert!(matches!(err, BinderError::Compile(_)));

    let unknown = "exports.default = class X extends host.Spaceship {};";
    let err = language.load_script("x.jsx", unknown).unwrap_err();
    assert_eq!(err.compile_error().unwrap().path, "x.jsx");
}

#[test]
fn test_binding_refcount_is_shared() {
    let language = language();
    let host = HostObject::new("Node");

    let first = language.alloc_instance_binding_data(&host).unwrap();
    let second = language.alloc_instance_binding_data(&host).unwrap();
    assert!(first.same_binding(&second));
    assert_eq!(first.data().refcount(), 0);

    language.refcount_incremented_instance_binding(&host);
    language.refcount_incremented_instance_binding(&host);
    assert_eq!(first.data().refcount(), 2);
    assert!(!language.refcount_decremented_instance_binding(&host));
    assert!(language.refcount_decremented_instance_binding(&host));
    assert!(!host.has_instance_binding());
    assert!(!first.is_live());

    // 回收后再分配得到新的绑定
    let third = language.alloc_instance_binding_data(&host).unwrap();
    assert!(!third.same_binding(&first));
    language.free_instance_binding_data(third.clone());
    assert!(!third.is_live());
}

#[test]
fn test_instance_reuses_existing_binding() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let player = HostObject::new("Node2D");

    let token = language.alloc_instance_binding_data(&player).unwrap();
    player.set_script(Some(script)).unwrap();
    let instance = player.script_instance().unwrap();
    assert!(Arc::ptr_eq(instance.binding(), token.data()));
    assert_eq!(token.data().refcount(), 1);

    player.set_script(None).unwrap();
    drop(instance);
    assert!(!token.is_live());
}

#[test]
fn test_placeholder_in_tooling_mode() {
    let language = JavaScriptLanguage::new(BinderConfig::tooling());
    language.init().unwrap();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    assert!(script.is_valid());
    assert!(!script.can_instantiate());

    let player = HostObject::new("Node2D");
    player.set_script(Some(script.clone())).unwrap();
    let placeholder = player.placeholder().unwrap();
    assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(10)));
    assert!(player.set("speed", 7.0).unwrap());
    assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(7)));
    assert!(!player.set("undeclared", 1).unwrap());
    assert!(!player.has_method("walk").unwrap());
    assert!(matches!(
        player.call("walk", &[]),
        Err(BinderError::MethodNotFound(_))
    ));

    // 重载后占位实例跟随新的属性列表
    script.set_source_code(PLAYER.replace(r#"title: "hero","#, ""));
    let report = script.reload(true).unwrap();
    assert_eq!(report.placeholders, 1);
    assert_eq!(placeholder.get_property_list().len(), 2);

    language.set_script_execution_enabled(true);
    assert!(player.upgrade_placeholder().unwrap());
    assert!(matches!(player.instance_slot(), InstanceSlot::Real(_)));
    assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(7)));
    assert!(script.placeholders().is_empty());
}

#[test]
fn test_teardown_invalidates_instances() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();

    let worker_language = language.clone();
    let handle = std::thread::spawn(move || {
        let player = HostObject::new("Node2D");
        player.set_script(Some(script)).unwrap();
        assert_eq!(player.get("speed").unwrap(), Some(ScriptValue::Int(10)));
        assert_eq!(worker_language.registry().binder_count(), 2);

        worker_language.thread_exit();
        let result = player.get("speed");
        assert!(!player.script_instance().unwrap().is_valid());
        result
    });
    let result = handle.join().unwrap();
    assert!(matches!(result, Err(BinderError::ContextGone)));
    assert_eq!(language.registry().binder_count(), 1);

    // 主 Binder 不能通过线程退出拆除
    language.thread_exit();
    assert!(language.registry().get_main_binder().is_some());
}

#[test]
fn test_instance_outliving_host_reports_host_gone() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let player = HostObject::new("Node2D");
    let instance = script.instance_create(&player).unwrap();
    assert_eq!(instance.get_property("speed").unwrap(), Some(ScriptValue::Int(10)));

    drop(player);
    assert!(instance.host().is_none());
    assert!(matches!(
        instance.get_property("speed"),
        Err(BinderError::HostGone)
    ));
    assert!(matches!(
        instance.call_method("walk", &[ScriptValue::Int(1)]),
        Err(BinderError::HostGone)
    ));
}

#[test]
fn test_reload_is_deferred_for_other_threads() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();

    let (ready_tx, ready_rx) = bounded::<()>(0);
    let (go_tx, go_rx) = bounded::<()>(0);
    let worker_script = script.clone();
    let worker = std::thread::spawn(move || {
        let player = HostObject::new("Node2D");
        player.set_script(Some(worker_script)).unwrap();
        player.set("speed", 3).unwrap();
        ready_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        let instance = player.script_instance().unwrap();
        let before = instance.class_version();
        let speed = player.get("speed").unwrap();
        let armor = player.get("armor").unwrap();
        (before, instance.class_version(), speed, armor)
    });

    ready_rx.recv().unwrap();
    script.set_source_code(PLAYER.replace(
        r#"title: "hero","#,
        r#"title: "hero", armor: { type: "int", default: 4 },"#,
    ));
    let report = script.reload(true).unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(report.migrated, 0);
    go_tx.send(()).unwrap();

    let (before, after, speed, armor) = worker.join().unwrap();
    assert_eq!(before, 1);
    assert_eq!(after, 2);
    assert_eq!(speed, Some(ScriptValue::Int(3)));
    assert_eq!(armor, Some(ScriptValue::Int(4)));
}

#[test]
fn test_deferred_reload_honours_any_reset_in_between() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();

    let (ready_tx, ready_rx) = bounded::<()>(0);
    let (go_tx, go_rx) = bounded::<()>(0);
    let worker_script = script.clone();
    let worker = std::thread::spawn(move || {
        let player = HostObject::new("Node2D");
        player.set_script(Some(worker_script)).unwrap();
        player.set("speed", 3).unwrap();
        ready_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        let speed = player.get("speed").unwrap();
        let version = player.script_instance().unwrap().class_version();
        (speed, version)
    });

    ready_rx.recv().unwrap();
    script.set_source_code(PLAYER.replace("return this.speed * n;", "return this.speed * n * 2;"));
    let reset = script.reload(false).unwrap();
    assert_eq!(reset.deferred, 1);
    script.set_source_code(PLAYER.replace("return this.speed * n;", "return this.speed * n * 3;"));
    let kept = script.reload(true).unwrap();
    assert_eq!(kept.deferred, 1);
    go_tx.send(()).unwrap();

    // 跨越的版本中有一次不保留状态，值回到默认
    let (speed, version) = worker.join().unwrap();
    assert_eq!(version, 3);
    assert_eq!(speed, Some(ScriptValue::Int(10)));
}

#[test]
fn test_cross_thread_drop_is_reclaimed_on_frame() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let player = HostObject::new("Node2D");
    player.set_script(Some(script)).unwrap();
    let main = language.registry().get_main_binder().unwrap();
    let before = main.bindings().reclaimed_count();

    std::thread::spawn(move || drop(player)).join().unwrap();
    assert_eq!(main.pending_reclaims(), 1);
    assert_eq!(main.bindings().reclaimed_count(), before + 1);

    language.frame();
    assert_eq!(main.pending_reclaims(), 0);
}

#[test]
fn test_dropped_script_releases_its_class() {
    let language = language();
    let binder = language.registry().current_binder().unwrap();
    let before = binder.live_classes();

    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let id = script.id();
    let player = HostObject::new("Node2D");
    player.set_script(Some(script.clone())).unwrap();
    assert!(binder.handle().has_class(id));
    assert_eq!(binder.live_classes(), before + 1);

    drop(player);
    drop(script);
    assert!(!binder.handle().has_class(id));
    assert!(binder.class_for(id).is_none());
    assert_eq!(binder.live_classes(), before);
}

#[test]
fn test_dropped_script_is_unregistered_on_other_threads_after_frame() {
    let language = language();
    let script = language.load_script("player.jsx", PLAYER).unwrap();
    let id = script.id();

    let (ready_tx, ready_rx) = bounded::<()>(0);
    let (go_tx, go_rx) = bounded::<()>(0);
    let worker_language = language.clone();
    let worker_script = script.clone();
    let worker = std::thread::spawn(move || {
        let player = HostObject::new("Node2D");
        player.set_script(Some(worker_script)).unwrap();
        drop(player);
        let binder = worker_language.registry().current_binder().unwrap();
        assert!(binder.handle().has_class(id));
        assert_eq!(binder.live_classes(), 1);
        ready_tx.send(()).unwrap();

        go_rx.recv().unwrap();
        let queued = binder.handle().pending_unregisters();
        let forgotten = !binder.handle().has_class(id);
        worker_language.frame();
        (
            queued,
            forgotten,
            binder.handle().pending_unregisters(),
            binder.live_classes(),
        )
    });

    ready_rx.recv().unwrap();
    drop(script);
    go_tx.send(()).unwrap();

    let (queued, forgotten, remaining, live) = worker.join().unwrap();
    assert_eq!(queued, 1);
    assert!(forgotten);
    assert_eq!(remaining, 0);
    assert_eq!(live, 0);
    assert!(language.registry().binders_with_class(id).is_empty());
}

#[test]
fn test_bytecode_only_script() {
    let language = language();
    let source_script = language.load_script("player.jsx", PLAYER).unwrap();
    let blob = source_script.export_bytecode().unwrap();

    let script = language.create_script();
    script.set_script_path("player.jsxb");
    script.set_bytecode(blob);
    assert!(!script.has_source_code());
    script.reload(false).unwrap();

    let player = HostObject::new("Node2D");
    player.set_script(Some(script)).unwrap();
    assert_eq!(player.call("walk", &[ScriptValue::Int(1)]).unwrap(), ScriptValue::Int(10));

    let broken = language.create_script();
    broken.set_bytecode(b"not bytecode".to_vec());
    assert!(matches!(
        broken.reload(false),
        Err(BinderError::InvalidBytecode(_))
    ));
}

#[test]
fn test_console_and_execute() {
    let language = language();
    let value = language
        .execute("console.log('hello', { a: 1 }); print('x'); 6 * 7")
        .unwrap();
    assert_eq!(value, ScriptValue::Int(42));
    assert!(language
        .execute("typeof __host_log")
        .map(|v| v == ScriptValue::String("undefined".into()))
        .unwrap());
}

#[test]
fn test_reload_all_and_find_by_path() {
    let language = language();
    let script = language.load_script("scripts/player.jsx", PLAYER).unwrap();
    assert_eq!(
        language.find_script_by_path("scripts/player.jsx").unwrap().id(),
        script.id()
    );

    script.set_source_code("exports.default = class {");
    let failures = language.reload_all_scripts();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].1, BinderError::ReloadFailure(_)));

    language.finish();
    assert!(!language.is_initialized());
    assert!(language.scripts().is_empty());
}
