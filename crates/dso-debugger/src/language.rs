//! Per-language compile/launch/variable rules, expressed as a capability
//! trait instead of the original's per-call `switch language { ... }`.
//!
//! Grounded on `debugger_debug.go`'s `compile`/`compileJava`/`startDap`
//! switches and `debugger_visual.go`'s `isTargetStruct`, per the "dynamic
//! dispatch" design note: one `LanguageAdapter` implementation per language,
//! selected by a small registry, mirroring the teacher's own
//! config-driven-kind provider selection pattern.

use std::sync::Arc;

use dso_error::Language;
use dso_sandbox::Sandbox;
use once_cell::sync::Lazy;
use regex::Regex;

/// Everything that differs between C, C++, Go, and Java.
#[async_trait::async_trait]
pub trait LanguageAdapter: Send + Sync {
    fn main_file_name(&self) -> &'static str;

    /// Compiles `main_file` (relative to `work_dir`) inside the sandbox and
    /// returns the path to the runnable artifact, or a scrubbed stderr on
    /// failure.
    async fn compile(
        &self,
        sandbox: &dyn Sandbox,
        work_dir: &str,
        main_file: &str,
    ) -> Result<String, String>;

    /// The shell command line written to the attached interactive stream to
    /// start the in-sandbox DAP server.
    fn launch_command(&self, exec_file: &str, main_file: &str) -> String;

    /// True if `type_str` (a DAP variable's `type` field) names the given
    /// struct/class, per this language's naming convention.
    fn is_target_struct_type(&self, type_str: &str, struct_name: &str) -> bool;

    /// Language-specific post-processing of one array element's display
    /// value, given the element's own DAP `type` (numeric-prefix stripping
    /// for C/C++ `char`; pass-through elsewhere).
    fn overlay_array_element(&self, raw: &str, type_str: &str) -> String {
        let _ = type_str;
        raw.to_string()
    }

    /// Builds array elements directly from a leaf (non-expandable) array
    /// variable's own value, for languages whose array-like values don't
    /// expose DAP children (Go strings, walked byte-by-byte). `None` means
    /// this variable isn't one of those special leaf cases.
    fn leaf_array_elements(&self, type_str: &str, value: &str) -> Option<Vec<String>> {
        let _ = (type_str, value);
        None
    }
}

pub struct CAdapter;
pub struct CppAdapter;
pub struct GoAdapter;
pub struct JavaAdapter;

static GO_PATH_PREAMBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^# command-line-arguments\n").expect("static regex"));
static GO_LOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\.\./|/).*?/(main\.go:\d+:\d+):").expect("static regex"));
static C_CHAR_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\s*").expect("static regex"));

/// Strips the work directory out of compiler stderr so the client never
/// sees sandbox-internal absolute paths.
fn scrub_work_dir(stderr: &str, work_dir: &str) -> String {
    stderr.replace(work_dir, "")
}

#[async_trait::async_trait]
impl LanguageAdapter for CAdapter {
    fn main_file_name(&self) -> &'static str {
        "main.c"
    }

    async fn compile(&self, sandbox: &dyn Sandbox, work_dir: &str, main_file: &str) -> Result<String, String> {
        let exec_file = format!("{work_dir}/main");
        let out = sandbox
            .exec(&[
                "gcc".to_string(),
                "-g".to_string(),
                "-o".to_string(),
                exec_file.clone(),
                format!("{work_dir}/{main_file}"),
            ])
            .await
            .map_err(|e| e.to_string())?;
        if out.exit_code != 0 {
            return Err(scrub_work_dir(&out.stderr, work_dir));
        }
        Ok(exec_file)
    }

    fn launch_command(&self, exec_file: &str, main_file: &str) -> String {
        format!("go-debugger -port 8080 -language c -file {exec_file} -codeFile {main_file}")
    }

    fn is_target_struct_type(&self, type_str: &str, struct_name: &str) -> bool {
        let pattern = format!(r"\b{}\b", regex::escape(struct_name));
        Regex::new(&pattern).map(|re| re.is_match(type_str)).unwrap_or(false)
    }

    fn overlay_array_element(&self, raw: &str, type_str: &str) -> String {
        if type_str == "char" {
            C_CHAR_PREFIX_RE.replace(raw, "").to_string()
        } else {
            raw.to_string()
        }
    }
}

#[async_trait::async_trait]
impl LanguageAdapter for CppAdapter {
    fn main_file_name(&self) -> &'static str {
        "main.cpp"
    }

    async fn compile(&self, sandbox: &dyn Sandbox, work_dir: &str, main_file: &str) -> Result<String, String> {
        let exec_file = format!("{work_dir}/main");
        let out = sandbox
            .exec(&[
                "g++".to_string(),
                "-g".to_string(),
                "-O0".to_string(),
                "-o".to_string(),
                exec_file.clone(),
                format!("{work_dir}/{main_file}"),
            ])
            .await
            .map_err(|e| e.to_string())?;
        if out.exit_code != 0 {
            return Err(scrub_work_dir(&out.stderr, work_dir));
        }
        Ok(exec_file)
    }

    fn launch_command(&self, exec_file: &str, main_file: &str) -> String {
        format!("go-debugger -port 8080 -language cpp -file {exec_file} -codeFile {main_file}")
    }

    fn is_target_struct_type(&self, type_str: &str, struct_name: &str) -> bool {
        let pattern = format!(r"\b{}\b", regex::escape(struct_name));
        Regex::new(&pattern).map(|re| re.is_match(type_str)).unwrap_or(false)
    }

    fn overlay_array_element(&self, raw: &str, type_str: &str) -> String {
        if type_str == "char" {
            C_CHAR_PREFIX_RE.replace(raw, "").to_string()
        } else {
            raw.to_string()
        }
    }
}

#[async_trait::async_trait]
impl LanguageAdapter for GoAdapter {
    fn main_file_name(&self) -> &'static str {
        "main.go"
    }

    async fn compile(&self, sandbox: &dyn Sandbox, work_dir: &str, main_file: &str) -> Result<String, String> {
        let exec_file = format!("{work_dir}/main");
        for cmd in [
            vec!["go".to_string(), "mod".to_string(), "init".to_string(), "main".to_string()],
            vec!["go".to_string(), "mod".to_string(), "tidy".to_string()],
        ] {
            let out = sandbox.exec(&cmd).await.map_err(|e| e.to_string())?;
            if out.exit_code != 0 {
                tracing::warn!(stderr = %out.stderr, cmd = ?cmd, "go mod step reported a non-zero exit");
            }
        }
        let out = sandbox
            .exec(&[
                "go".to_string(),
                "build".to_string(),
                "-gcflags".to_string(),
                "all=-N -l".to_string(),
                "-o".to_string(),
                exec_file.clone(),
            ])
            .await
            .map_err(|e| e.to_string())?;
        if out.exit_code != 0 {
            return Err(scrub_go_stderr(&out.stderr, work_dir));
        }
        let _ = main_file;
        Ok(exec_file)
    }

    fn launch_command(&self, exec_file: &str, _main_file: &str) -> String {
        format!(
            "dlv --listen=0.0.0.0:8080 --headless=true --api-version=2 \
             --check-go-version=false --only-same-user=false exec {exec_file} --"
        )
    }

    fn is_target_struct_type(&self, type_str: &str, struct_name: &str) -> bool {
        let pattern = format!(r"^\*.*\.{}.*$", regex::escape(struct_name));
        Regex::new(&pattern).map(|re| re.is_match(type_str)).unwrap_or(false)
    }

    /// A Go string is a leaf DAP value (no children), so it never reaches
    /// the per-child overlay path; walk its trimmed value directly, fusing
    /// a `\`-escape with the character that follows it into one element,
    /// per `getArrayNodesForGo`.
    fn leaf_array_elements(&self, type_str: &str, value: &str) -> Option<Vec<String>> {
        if type_str != "string" {
            return None;
        }
        let trimmed = value.trim_matches('"');
        let chars: Vec<char> = trimmed.chars().collect();
        let mut out = Vec::with_capacity(chars.len());
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '\\' && i + 1 < chars.len() {
                out.push(format!("'{}{}'", chars[i], chars[i + 1]));
                i += 2;
            } else {
                out.push(format!("'{}'", chars[i]));
                i += 1;
            }
        }
        Some(out)
    }
}

fn scrub_go_stderr(stderr: &str, work_dir: &str) -> String {
    let without_preamble = GO_PATH_PREAMBLE.replace(stderr, "");
    let rewritten = GO_LOCATION_RE.replace_all(&without_preamble, "$1:");
    rewritten.replace(work_dir, "")
}

#[async_trait::async_trait]
impl LanguageAdapter for JavaAdapter {
    fn main_file_name(&self) -> &'static str {
        "Main.java"
    }

    async fn compile(&self, sandbox: &dyn Sandbox, work_dir: &str, main_file: &str) -> Result<String, String> {
        let class_path = format!("{work_dir}/classPath");
        let out = sandbox
            .exec(&[
                "javac".to_string(),
                "-encoding".to_string(),
                "UTF-8".to_string(),
                "-d".to_string(),
                class_path.clone(),
                format!("{work_dir}/{main_file}"),
            ])
            .await
            .map_err(|e| e.to_string())?;
        if out.exit_code != 0 {
            return Err(scrub_work_dir(&out.stderr, work_dir));
        }

        let manifest = "Manifest-Version: 1.0\nMain-Class: Main\n";
        sandbox
            .copy_to(&class_path, "manifest", manifest.as_bytes())
            .await
            .map_err(|e| e.to_string())?;

        let exec_file = format!("{work_dir}/main");
        let out = sandbox
            .exec(&[
                "jar".to_string(),
                "cvfm".to_string(),
                exec_file.clone(),
                format!("{class_path}/manifest"),
                "-C".to_string(),
                class_path.clone(),
                ".".to_string(),
            ])
            .await
            .map_err(|e| e.to_string())?;
        if out.exit_code != 0 {
            return Err(scrub_work_dir(&out.stderr, work_dir));
        }
        Ok(exec_file)
    }

    fn launch_command(&self, exec_file: &str, main_file: &str) -> String {
        format!("go-debugger -port 8080 -language java -file {exec_file} -codeFile {main_file}")
    }

    fn is_target_struct_type(&self, type_str: &str, struct_name: &str) -> bool {
        let pattern = format!(r"\b{}\b", regex::escape(struct_name));
        Regex::new(&pattern).map(|re| re.is_match(type_str)).unwrap_or(false)
    }
}

pub fn adapter_for(language: Language) -> Arc<dyn LanguageAdapter> {
    match language {
        Language::C => Arc::new(CAdapter),
        Language::Cpp => Arc::new(CppAdapter),
        Language::Go => Arc::new(GoAdapter),
        Language::Java => Arc::new(JavaAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_adapter_strips_numeric_prefix_only_for_char_elements() {
        let adapter = CAdapter;
        assert_eq!(adapter.overlay_array_element("97 'a'", "char"), "'a'");
        assert_eq!(adapter.overlay_array_element("42", "int"), "42");
    }

    #[test]
    fn cpp_adapter_strips_numeric_prefix_only_for_char_elements() {
        let adapter = CppAdapter;
        assert_eq!(adapter.overlay_array_element("98 'b'", "char"), "'b'");
        assert_eq!(adapter.overlay_array_element("3.14", "double"), "3.14");
    }

    #[test]
    fn go_adapter_leaf_array_elements_ignores_non_string_types() {
        let adapter = GoAdapter;
        assert_eq!(adapter.leaf_array_elements("int", "42"), None);
    }

    #[test]
    fn go_adapter_leaf_array_elements_walks_trimmed_string() {
        let adapter = GoAdapter;
        let elements = adapter.leaf_array_elements("string", "\"ab\"").expect("string leaf");
        assert_eq!(elements, vec!["'a'".to_string(), "'b'".to_string()]);
    }

    #[test]
    fn go_adapter_leaf_array_elements_fuses_escape_with_next_char() {
        let adapter = GoAdapter;
        // Raw DAP value content is the four characters a, \, n, b (a literal
        // backslash-n, not an actual newline).
        let elements = adapter.leaf_array_elements("string", "\"a\\nb\"").expect("string leaf");
        assert_eq!(
            elements,
            vec!["'a'".to_string(), "'\\n'".to_string(), "'b'".to_string()]
        );
    }

    #[test]
    fn go_adapter_is_target_struct_type_matches_pointer_receiver() {
        let adapter = GoAdapter;
        assert!(adapter.is_target_struct_type("*main.Node", "Node"));
        assert!(!adapter.is_target_struct_type("*main.Edge", "Node"));
    }

    #[test]
    fn java_adapter_overlay_array_element_defaults_to_pass_through() {
        let adapter = JavaAdapter;
        assert_eq!(adapter.overlay_array_element("hello", "String"), "hello");
        assert_eq!(adapter.leaf_array_elements("String", "hello"), None);
    }
}
