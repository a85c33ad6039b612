//! Transpiles scripts down to the configured target and minifies them.

use std::path::Path;

use camino::Utf8PathBuf;
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::semantic::SemanticBuilder;
use oxc::span::SourceType;
use oxc::transformer::{EngineTargets, TransformOptions, Transformer};
use thiserror::Error;

use crate::config::{Config, ScriptOptions, SourceSet};
use crate::core::TaskName;
use crate::error::TaskError;
use crate::io::{SourceFile, collect_sources, write_atomic};
use crate::sourcemap::relative_url;
use crate::task::{Outcome, Report, run_batch};

/// Errors that can occur when compiling scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Syntax error:\n{0}")]
    Parse(String),

    #[error("Unknown target '{target}': {reason}")]
    Target { target: String, reason: String },

    #[error("Transform error:\n{0}")]
    Transform(String),
}

/// Output of compiling one script.
#[derive(Debug)]
pub struct Compiled {
    pub code: String,
    pub map: Option<String>,
}

pub struct ScriptTask {
    sources: SourceSet,
    root: Utf8PathBuf,
    dist: Utf8PathBuf,
    options: ScriptOptions,
}

impl ScriptTask {
    pub fn new(config: &Config) -> Self {
        Self {
            sources: config.scripts(),
            root: config.root.clone(),
            dist: config.dist_scripts(),
            options: config.script.clone(),
        }
    }

    pub fn run(&self) -> Result<Report, TaskError> {
        // reject a bad target once instead of once per file
        TransformOptions::from_target(&self.options.target).map_err(|reason| {
            TaskError::transform(
                &self.root,
                ScriptError::Target {
                    target: self.options.target.clone(),
                    reason,
                },
            )
        })?;

        let files = collect_sources(&self.sources)?;
        run_batch(TaskName::Script, &files, |file| self.process(file))
    }

    fn process(&self, file: &SourceFile) -> Result<Outcome, TaskError> {
        let source = file.read_to_string()?;

        let path = self.dist.join(&file.rel);
        let name = path.file_name().unwrap_or("script.js");
        let dir = path.parent().unwrap_or(&self.dist);

        let url = relative_url(dir, &file.path);
        let compiled = compile(&source, Path::new(&url), &self.options)
            .map_err(|e| TaskError::transform(&file.path, e))?;

        let map_name = format!("{name}.map");
        let code = match compiled.map {
            Some(map) => {
                write_atomic(&dir.join(&map_name), map)?;
                format!("{}\n//# sourceMappingURL={map_name}\n", compiled.code)
            }
            None => compiled.code,
        };

        write_atomic(&path, code)?;

        Ok(Outcome::Written)
    }
}

/// Parses, lowers and minifies one script. `path` ends up as the source URL
/// in the map.
pub fn compile(
    source: &str,
    path: &Path,
    options: &ScriptOptions,
) -> Result<Compiled, ScriptError> {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(path).unwrap_or_else(|_| SourceType::mjs());

    let ret = Parser::new(&allocator, source, source_type).parse();
    if ret.panicked || !ret.errors.is_empty() {
        return Err(ScriptError::Parse(join(&ret.errors)));
    }
    let mut program = ret.program;

    let unknown = |reason: String| ScriptError::Target {
        target: options.target.clone(),
        reason,
    };
    let transform = TransformOptions::from_target(&options.target).map_err(unknown)?;
    // the compressor would otherwise fold lowered syntax back into esnext
    let engines = EngineTargets::from_target(&options.target).map_err(unknown)?;

    let scoping = SemanticBuilder::new()
        .build(&program)
        .semantic
        .into_scoping();

    let ret = Transformer::new(&allocator, path, &transform)
        .build_with_scoping(scoping, &mut program);
    if !ret.errors.is_empty() {
        return Err(ScriptError::Transform(join(&ret.errors)));
    }

    let minified = Minifier::new(MinifierOptions {
        mangle: options.mangle.then(MangleOptions::default),
        compress: Some(CompressOptions {
            target: engines,
            ..CompressOptions::smallest()
        }),
    })
    .minify(&allocator, &mut program);

    let ret = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            source_map_path: Some(path.to_path_buf()),
            ..CodegenOptions::default()
        })
        .with_scoping(minified.scoping)
        .build(&program);

    Ok(Compiled {
        code: ret.code,
        map: ret.map.map(|map| map.to_json_string()),
    })
}

fn join(errors: &[impl ToString]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ScriptOptions {
        Config::default().script
    }

    #[test]
    fn test_lowers_to_es2015_and_minifies() {
        let src = "const add = (a, b) => a ** b;\nconsole.log(add(2, 3));\n";
        let out = compile(src, Path::new("app.js"), &options()).unwrap();

        assert!(!out.code.contains("**"));
        assert!(out.code.contains("Math.pow"));
        assert!(out.code.len() < src.len());
    }

    #[test]
    fn test_compressor_respects_target() {
        let src = concat!(
            "export const pick = (a, b) => a ?? b;\n",
            "export const len = (o) => o?.items.length;\n",
            "export const square = (n) => n ** 2;\n",
        );
        let out = compile(src, Path::new("app.js"), &options()).unwrap();

        assert!(!out.code.contains("??"));
        assert!(!out.code.contains("?."));
        assert!(!out.code.contains("**"));
    }

    #[test]
    fn test_emits_source_map() {
        let out = compile(
            "function greet(name) { return 'hi ' + name; }\ngreet('x');\n",
            Path::new("../../src/scripts/app.js"),
            &options(),
        )
        .unwrap();

        let map: serde_json::Value = serde_json::from_str(&out.map.unwrap()).unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["sources"][0], "../../src/scripts/app.js");
    }

    #[test]
    fn test_syntax_error() {
        let err = compile("function (", Path::new("bad.js"), &options()).unwrap_err();
        assert!(matches!(err, ScriptError::Parse(_)));
    }

    #[test]
    fn test_unknown_target() {
        let mut opts = options();
        opts.target = "es1999".into();

        let err = compile("let a = 1;", Path::new("a.js"), &opts).unwrap_err();
        assert!(matches!(err, ScriptError::Target { .. }));
    }

    #[test]
    fn test_task_writes_script_and_map() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let scripts = root.join("src/scripts/lib");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(scripts.join("util.js"), "export const twice = x => x * 2;\n").unwrap();
        std::fs::write(scripts.join("broken.js"), "const = ;").unwrap();

        let config = Config::new(&root);
        let report = ScriptTask::new(&config).run().unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 1);

        let out = config.dist_scripts().join("lib");
        let code = std::fs::read_to_string(out.join("util.js")).unwrap();
        assert!(code.ends_with("//# sourceMappingURL=util.js.map\n"));
        assert!(out.join("util.js.map").is_file());
        assert!(!out.join("broken.js").exists());
    }
}
