//! 绑定层性能基准测试
//!
//! 测试编译、实例化、属性访问、方法调用和热重载迁移的开销

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use script_binder::{BinderConfig, HostObject, JavaScriptLanguage, ScriptLanguage, ScriptValue};

const MOVER: &str = r#"
class Mover extends host.Node2D {
    static properties = {
        speed: { type: "float", default: 1.5 },
        label: "mover",
    };

    step(dt) {
        return this.speed * dt;
    }
}
exports.default = Mover;
"#;

fn language() -> JavaScriptLanguage {
    let language = JavaScriptLanguage::new(BinderConfig::default());
    language.init().expect("init language");
    language
}

fn bench_compile(c: &mut Criterion) {
    let language = language();
    c.bench_function("compile_class", |b| {
        b.iter(|| {
            let script = language.load_script("mover.jsx", black_box(MOVER)).unwrap();
            black_box(script)
        });
    });
}

fn bench_instantiate(c: &mut Criterion) {
    let mut group = c.benchmark_group("instantiate");
    let language = language();
    let script = language.load_script("mover.jsx", MOVER).unwrap();

    for count in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let hosts: Vec<_> = (0..count)
                    .map(|_| {
                        let host = HostObject::new("Node2D");
                        host.set_script(Some(script.clone())).unwrap();
                        host
                    })
                    .collect();
                black_box(hosts)
            });
        });
    }

    group.finish();
}

fn bench_property_access(c: &mut Criterion) {
    let language = language();
    let script = language.load_script("mover.jsx", MOVER).unwrap();
    let host = HostObject::new("Node2D");
    host.set_script(Some(script)).unwrap();

    c.bench_function("property_get", |b| {
        b.iter(|| black_box(host.get(black_box("speed")).unwrap()));
    });
    c.bench_function("property_set", |b| {
        b.iter(|| black_box(host.set("speed", black_box(2.5)).unwrap()));
    });
    c.bench_function("method_call", |b| {
        let args = [ScriptValue::Float(0.016)];
        b.iter(|| black_box(host.call("step", black_box(&args)).unwrap()));
    });
}

fn bench_reload(c: &mut Criterion) {
    let mut group = c.benchmark_group("reload_keep_state");
    let language = language();

    for count in [10, 100].iter() {
        let script = language.load_script("mover.jsx", MOVER).unwrap();
        let hosts: Vec<_> = (0..*count)
            .map(|_| {
                let host = HostObject::new("Node2D");
                host.set_script(Some(script.clone())).unwrap();
                host
            })
            .collect();
        let variants = [MOVER.to_string(), MOVER.replace("this.speed * dt", "dt * this.speed")];
        let mut flip = 0usize;

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                flip ^= 1;
                script.set_source_code(variants[flip].clone());
                black_box(script.reload(true).unwrap())
            });
        });
        black_box(&hosts);
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_compile,
    bench_instantiate,
    bench_property_access,
    bench_reload
);
criterion_main!(benches);
