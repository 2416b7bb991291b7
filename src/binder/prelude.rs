//! 引擎侧辅助脚本
//!
//! 每个上下文创建时执行一次。脚本对象保存在引擎内部的槽位表中，
//! 宿主只通过数字槽位和 JSON 字符串与之交互。

use serde::Serialize;

use crate::classdb::ClassDescriptorTable;
use crate::core::BinderResult;

/// 辅助对象在全局对象上的名字
pub(crate) const BINDER_GLOBAL: &str = "__script_binder";

/// 日志回调在全局对象上的临时名字，辅助脚本取走后删除
pub(crate) const HOST_LOG_GLOBAL: &str = "__host_log";

pub(crate) const PRELUDE: &str = r#"
(function (global) {
    'use strict';

    const HOST_TAG = Symbol('hostClass');
    const PREFIX = '{ const exports = {};';
    const SUFFIX = '\n;exports.default;\n}';
    const OK = '{"ok":true}';
    const NOT_FOUND = '{"found":false}';

    const classes = new Map();
    const values = new Map();
    let hostNamespace = {};

    const hostLog = global.__host_log;
    delete global.__host_log;

    function errorMessage(error) {
        if (error && typeof error.message === 'string') {
            return (error.name ? error.name + ': ' : '') + error.message;
        }
        return String(error);
    }

    function fail(error) {
        return JSON.stringify({ ok: false, message: errorMessage(error) });
    }

    function location(error) {
        let line = error && typeof error.lineNumber === 'number' ? error.lineNumber : 0;
        let column = error && typeof error.columnNumber === 'number' ? error.columnNumber : 0;
        const stack = error && typeof error.stack === 'string' ? error.stack : '';
        const match = /<input>:(\d+)(?::(\d+))?/.exec(stack);
        if (match) {
            if (!line) line = Number(match[1]);
            if (!column && match[2]) column = Number(match[2]);
        }
        return { line, column };
    }

    function typeName(value) {
        if (value === null || value === undefined) return 'nil';
        if (typeof value === 'boolean') return 'bool';
        if (typeof value === 'number') return Number.isInteger(value) ? 'int' : 'float';
        if (typeof value === 'string') return 'string';
        if (Array.isArray(value)) return 'array';
        if (typeof value === 'object') return 'dictionary';
        return 'variant';
    }

    function parameterNames(fn) {
        const match = /^[^(]*\(([^)]*)\)/.exec(Function.prototype.toString.call(fn));
        if (match) {
            const names = match[1].split(',')
                .map((p) => p.replace(/=.*$/s, '').replace(/^\.\.\./, '').trim())
                .filter((p) => /^[A-Za-z_$][\w$]*$/.test(p));
            if (names.length > 0 || fn.length === 0) return names;
        }
        return Array.from({ length: fn.length }, (_, i) => 'arg' + i);
    }

    function isHostClass(ctor) {
        return typeof ctor === 'function' && Object.prototype.hasOwnProperty.call(ctor, HOST_TAG);
    }

    function isTypedEntry(entry) {
        return entry !== null && typeof entry === 'object' && !Array.isArray(entry)
            && ('default' in entry || 'type' in entry);
    }

    function defaultOf(entry) {
        const value = isTypedEntry(entry) ? entry.default : entry;
        return value === undefined ? null : value;
    }

    function describe(cls) {
        const properties = [];
        const declared = cls.properties;
        if (declared && typeof declared === 'object' && !Array.isArray(declared)) {
            for (const name of Object.keys(declared)) {
                const entry = declared[name];
                const value = defaultOf(entry);
                const type = isTypedEntry(entry) && entry.type ? String(entry.type) : typeName(value);
                properties.push({ name, type, default: value });
            }
        }

        const methods = [];
        const seen = new Set(['constructor']);
        for (let proto = cls.prototype; proto && proto !== Object.prototype;
            proto = Object.getPrototypeOf(proto)) {
            if (isHostClass(proto.constructor)) break;
            for (const key of Object.getOwnPropertyNames(proto)) {
                if (seen.has(key)) continue;
                const desc = Object.getOwnPropertyDescriptor(proto, key);
                if (desc && typeof desc.value === 'function') {
                    seen.add(key);
                    methods.push({ name: key, arguments: parameterNames(desc.value) });
                }
            }
        }

        const signals = [];
        const declaredSignals = cls.signals;
        if (Array.isArray(declaredSignals)) {
            for (const name of declaredSignals) {
                signals.push({ name: String(name), arguments: [] });
            }
        } else if (declaredSignals && typeof declaredSignals === 'object') {
            for (const name of Object.keys(declaredSignals)) {
                const args = declaredSignals[name];
                signals.push({ name, arguments: Array.isArray(args) ? args.map(String) : [] });
            }
        }

        return {
            class_name: typeof cls.name === 'string' ? cls.name : '',
            base_type: typeof cls[HOST_TAG] === 'string' ? cls[HOST_TAG] : '',
            properties,
            methods,
            signals,
            tool: cls.tool === true,
        };
    }

    function install(namespace, hostClasses) {
        const ns = global[namespace] || (global[namespace] = {});
        for (const info of JSON.parse(hostClasses)) {
            const Base = info.base ? ns[info.base] : undefined;
            const cls = Base ? class extends Base {} : class {};
            Object.defineProperty(cls, 'name', { value: info.name });
            Object.defineProperty(cls, HOST_TAG, { value: info.name });
            ns[info.name] = cls;
        }
        hostNamespace = ns;
    }

    function compile(id, source, path) {
        let cls;
        try {
            cls = (0, eval)(PREFIX + source + SUFFIX);
        } catch (error) {
            const at = location(error);
            if (at.line === 1 && at.column > PREFIX.length) at.column -= PREFIX.length;
            return JSON.stringify({
                ok: false,
                line: at.line,
                column: at.column,
                message: errorMessage(error),
            });
        }
        if (typeof cls !== 'function') {
            return JSON.stringify({
                ok: false,
                line: 1,
                column: 1,
                message: 'script must export a class through exports.default',
            });
        }
        let descriptor;
        try {
            descriptor = describe(cls);
        } catch (error) {
            return JSON.stringify({ ok: false, line: 1, column: 1, message: errorMessage(error) });
        }
        if (id > 0) classes.set(id, cls);
        return JSON.stringify({ ok: true, descriptor });
    }

    function construct(id, slot) {
        const cls = classes.get(id);
        if (!cls) return fail('class ' + id + ' is not compiled in this context');
        try {
            const instance = new cls();
            const declared = cls.properties;
            if (declared && typeof declared === 'object' && !Array.isArray(declared)) {
                for (const name of Object.keys(declared)) {
                    if (instance[name] !== undefined) continue;
                    const value = defaultOf(declared[name]);
                    try {
                        // 默认值按值复制，实例之间不共享
                        instance[name] = value !== null && typeof value === 'object'
                            ? JSON.parse(JSON.stringify(value))
                            : value;
                    } catch (error) {
                        continue;
                    }
                }
            }
            values.set(slot, instance);
            return OK;
        } catch (error) {
            return fail(error);
        }
    }

    function wrap(slot, className) {
        const ctor = hostNamespace[className];
        try {
            values.set(slot, ctor ? new ctor() : {});
            return true;
        } catch (error) {
            return false;
        }
    }

    function release(slot) {
        return values.delete(slot);
    }

    function discard(id) {
        return classes.delete(id);
    }

    function get(slot, name) {
        const target = values.get(slot);
        if (target === undefined) return NOT_FOUND;
        try {
            const value = target[name];
            if (value === undefined || typeof value === 'function') return NOT_FOUND;
            return JSON.stringify({ found: true, value });
        } catch (error) {
            return JSON.stringify({ found: false, error: errorMessage(error) });
        }
    }

    function set(slot, name, json) {
        const target = values.get(slot);
        if (target === undefined) return fail('value has been released');
        try {
            target[name] = JSON.parse(json);
            return OK;
        } catch (error) {
            return fail(error);
        }
    }

    function call(slot, name, args) {
        const target = values.get(slot);
        if (target === undefined) return fail('value has been released');
        const method = target[name];
        if (typeof method !== 'function') return '{"ok":false,"missing":true}';
        try {
            const result = method.apply(target, JSON.parse(args));
            return JSON.stringify({ ok: true, value: result === undefined ? null : result });
        } catch (error) {
            return fail(error);
        }
    }

    function hasMethod(slot, name) {
        const target = values.get(slot);
        if (target === undefined) return false;
        const method = target[name];
        if (typeof method !== 'function') return false;
        for (let proto = target; proto && proto !== Object.prototype;
            proto = Object.getPrototypeOf(proto)) {
            if (isHostClass(proto.constructor) && proto === proto.constructor.prototype) break;
            if (Object.prototype.hasOwnProperty.call(proto, name)) return true;
        }
        return false;
    }

    function execute(source) {
        try {
            const result = (0, eval)(source);
            let value = null;
            try {
                value = result === undefined ? null : JSON.parse(JSON.stringify(result) ?? 'null');
            } catch (error) {
                value = String(result);
            }
            return JSON.stringify({ ok: true, value });
        } catch (error) {
            const at = location(error);
            return JSON.stringify({
                ok: false,
                syntax: error instanceof SyntaxError,
                line: at.line,
                column: at.column,
                message: errorMessage(error),
            });
        }
    }

    function liveValues() {
        return values.size;
    }

    function liveClasses() {
        return classes.size;
    }

    function format(args) {
        return args.map((arg) => {
            if (typeof arg === 'string') return arg;
            try {
                const text = JSON.stringify(arg);
                return text === undefined ? String(arg) : text;
            } catch (error) {
                return String(arg);
            }
        }).join(' ');
    }

    global.console = {
        log: (...args) => hostLog('info', format(args)),
        info: (...args) => hostLog('info', format(args)),
        debug: (...args) => hostLog('debug', format(args)),
        warn: (...args) => hostLog('warn', format(args)),
        error: (...args) => hostLog('error', format(args)),
    };
    global.print = (...args) => hostLog('info', format(args));

    Object.defineProperty(global, '__script_binder', {
        value: Object.freeze({
            install, compile, construct, wrap, release, discard,
            get, set, call, hasMethod, execute, liveValues, liveClasses,
        }),
    });
})(globalThis);
"#;

#[derive(Serialize)]
struct HostClassEntry<'a> {
    name: &'a str,
    base: &'a str,
}

/// 宿主类列表（父类在前）编码为 `install` 的参数
pub(crate) fn host_class_manifest(table: &ClassDescriptorTable) -> BinderResult<String> {
    let entries: Vec<HostClassEntry<'_>> = table
        .iter()
        .map(|class| HostClassEntry {
            name: &class.class_name,
            base: &class.base_type,
        })
        .collect();
    Ok(serde_json::to_string(&entries)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_is_parent_first() {
        let table = ClassDescriptorTable::with_builtin_classes();
        let manifest = host_class_manifest(&table).unwrap();
        let node = manifest.find("\"name\":\"Node\"").unwrap();
        let node2d = manifest.find("\"name\":\"Node2D\"").unwrap();
        assert!(node < node2d);
        assert!(manifest.starts_with("[{\"name\":\"Object\",\"base\":\"\"}"));
    }

    #[test]
    fn test_prelude_names_match_globals() {
        assert!(PRELUDE.contains(BINDER_GLOBAL));
        assert!(PRELUDE.contains(HOST_LOG_GLOBAL));
    }
}
