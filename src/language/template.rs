//! 新脚本模板

use std::sync::Arc;

use super::javascript::JavaScriptLanguage;
use super::{ScriptLanguage, TemplateProvider};
use crate::script::Script;

const TEMPLATE: &str = r#"class %CLASS% extends %NAMESPACE%.%BASE% {
    static properties = {};
    static signals = [];

    constructor() {
        super();
    }

    ready() {
    }
}

exports.default = %CLASS%;
"#;

impl TemplateProvider for JavaScriptLanguage {
    fn get_template(&self, class_name: &str, base_class: &str) -> String {
        let base = if self.registry().class_table().contains(base_class) {
            base_class
        } else {
            "Object"
        };
        TEMPLATE
            .replace("%CLASS%", class_name)
            .replace("%NAMESPACE%", &self.config().script_namespace)
            .replace("%BASE%", base)
    }

    fn make_template(&self, class_name: &str, base_class: &str) -> Arc<Script> {
        let script = self.create_script();
        script.set_class_name(class_name);
        script.set_source_code(self.get_template(class_name, base_class));
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinderConfig;

    #[test]
    fn test_template_compiles() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        let source = language.get_template("Player", "Node2D");
        assert!(source.contains("class Player extends host.Node2D"));

        let result = language.validate(&source, "player.jsx");
        assert!(result.ok, "{:?}", result);
        assert_eq!(result.functions, ["ready"]);

        let script = language.make_template("Player", "Node2D");
        assert_eq!(script.class_name(), "Player");
        script.reload(false).unwrap();
        assert_eq!(script.get_instance_base_type().as_deref(), Some("Node2D"));
    }

    #[test]
    fn test_unknown_base_falls_back_to_root() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        assert!(language
            .get_template("Thing", "NoSuchClass")
            .contains("extends host.Object"));
    }
}
