//! 脚本检查工具
//!
//! 用法: `script_binder <file.jsx>...`
//! 逐个校验脚本，打印类信息或带行列号的错误。

use std::process::ExitCode;

use script_binder::core::init_logging;
use script_binder::{BinderConfig, JavaScriptLanguage, ScriptLanguage};

fn main() -> ExitCode {
    let mut config = BinderConfig::load_or_default();
    config.apply_env_overrides();
    init_logging(&config.logging);

    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        eprintln!("usage: script_binder <file.jsx>...");
        return ExitCode::from(2);
    }

    let language = JavaScriptLanguage::new(config);
    if let Err(e) = language.init() {
        eprintln!("Failed to initialize script language: {}", e);
        return ExitCode::FAILURE;
    }

    let mut failed = 0;
    for file in &files {
        let source = match std::fs::read_to_string(file) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("{}: {}", file, e);
                failed += 1;
                continue;
            }
        };
        match language.load_script(file, &source) {
            Ok(script) => {
                println!(
                    "{}: class {} extends {} ({} properties, {} methods, {} signals)",
                    file,
                    script.class_name(),
                    script.get_instance_base_type().unwrap_or_default(),
                    script.get_script_property_list().len(),
                    script.get_script_method_list().len(),
                    script.get_script_signal_list().len()
                );
            }
            Err(e) => {
                match e.compile_error() {
                    Some(err) => eprintln!("{}:{}:{}: {}", file, err.line, err.column, err.message),
                    None => eprintln!("{}: {}", file, e),
                }
                failed += 1;
            }
        }
    }

    language.finish();
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
