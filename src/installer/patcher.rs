//! Build descriptor (`*.Build.cs`) patching.
//!
//! This is a line-oriented scanner, not a C# parser. The setup function is
//! found by a literal signature, and its body is delimited by counting braces.
//! Braces inside string literals or comments are counted too.

use std::fs;
use std::path::{Path, PathBuf};

use crate::installer::manifest::ProjectManifest;
use crate::model::catalog::{Catalog, PluginCatalogEntry};
use crate::model::config::PatcherConfig;
use crate::model::selection::InstalledSet;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("no build file found (tried {})", tried.join(", "))]
    BuildFileMissing { tried: Vec<String> },
    #[error("setup function signature not found")]
    AnchorNotFound,
    #[error("setup function has no opening brace")]
    OpeningBraceMissing,
    #[error("setup function body is never closed")]
    Unbalanced,
    #[error("setup function body fits on one line")]
    SingleLineBody,
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Build script text plus the located setup body.
#[derive(Debug, Clone)]
pub struct BuildDescriptor {
    text: String,
    /// Start of the first line after the opening brace.
    insertion_start: usize,
    /// Offset of the closing brace.
    body_end: usize,
}

impl BuildDescriptor {
    pub fn locate(text: String, anchor: &str) -> Result<Self, PatchError> {
        let (open_brace, insertion_start) = find_opening_brace(&text, anchor)?;
        let body_end = find_closing_brace(&text, open_brace)?;
        if body_end < insertion_start {
            return Err(PatchError::SingleLineBody);
        }

        Ok(Self {
            text,
            insertion_start,
            body_end,
        })
    }

    pub fn insertion_start(&self) -> usize {
        self.insertion_start
    }

    pub fn body_end(&self) -> usize {
        self.body_end
    }

    pub fn body(&self) -> &str {
        &self.text[self.insertion_start..self.body_end]
    }

    /// Drop every body line quoting one of `candidates`, then insert one
    /// declaration per `desired` name at the top of the body.
    pub fn patch(
        &self,
        desired: &[&str],
        candidates: &[&str],
        declaration: impl Fn(&str) -> String,
    ) -> String {
        let newline = if self.text.contains("\r\n") { "\r\n" } else { "\n" };
        let quoted: Vec<String> = candidates
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| format!("\"{name}\""))
            .collect();

        let mut out = String::with_capacity(self.text.len() + desired.len() * 64);
        out.push_str(&self.text[..self.insertion_start]);
        for name in desired {
            out.push_str(&declaration(name));
            out.push_str(newline);
        }
        for line in self.body().split_inclusive('\n') {
            if !quoted.iter().any(|needle| line.contains(needle.as_str())) {
                out.push_str(line);
            }
        }
        out.push_str(&self.text[self.body_end..]);
        out
    }
}

fn find_opening_brace(text: &str, anchor: &str) -> Result<(usize, usize), PatchError> {
    let mut offset = 0;
    let mut anchor_seen = false;

    for line in text.split_inclusive('\n') {
        let line_end = offset + line.len();
        if anchor_seen {
            // Opening brace on the line after the signature.
            return match line.find('{') {
                Some(idx) => Ok((offset + idx, line_end)),
                None => Err(PatchError::OpeningBraceMissing),
            };
        }

        if let Some(at) = line.find(anchor) {
            anchor_seen = true;
            let after = at + anchor.len();
            if let Some(idx) = line[after..].find('{') {
                return Ok((offset + after + idx, line_end));
            }
        }
        offset = line_end;
    }

    if anchor_seen {
        Err(PatchError::OpeningBraceMissing)
    } else {
        Err(PatchError::AnchorNotFound)
    }
}

fn find_closing_brace(text: &str, open_brace: usize) -> Result<usize, PatchError> {
    let mut depth = 1usize;
    let start = open_brace + 1;
    for (idx, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(start + idx);
                }
            }
            _ => {}
        }
    }
    Err(PatchError::Unbalanced)
}

/// `Source/<T>/<T>.Build.cs` for the target, else the default target's file.
pub fn resolve_build_file(
    project_dir: &Path,
    target: Option<&str>,
    fallback: Option<&str>,
) -> Result<PathBuf, PatchError> {
    let build_file = |name: &str| {
        project_dir
            .join("Source")
            .join(name)
            .join(format!("{name}.Build.cs"))
    };

    let mut tried = Vec::new();
    let target = target
        .map(|target| target.replace("Target", ""))
        .filter(|target| !target.is_empty());

    for name in target.as_deref().into_iter().chain(fallback) {
        let path = build_file(name);
        if path.is_file() {
            return Ok(path);
        }
        tried.push(path.display().to_string());
    }

    Err(PatchError::BuildFileMissing { tried })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Game,
    Editor,
}

impl TargetKind {
    pub fn label(self) -> &'static str {
        match self {
            TargetKind::Game => "game",
            TargetKind::Editor => "editor",
        }
    }
}

#[derive(Debug)]
pub struct PatchOutcome {
    pub kind: TargetKind,
    pub result: Result<PathBuf, PatchError>,
}

impl PatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Rewrite one build file so its setup body declares exactly `desired`.
pub fn patch_build_file(
    path: &Path,
    desired: &[&str],
    candidates: &[&str],
    config: &PatcherConfig,
) -> Result<(), PatchError> {
    let io_err = |source| PatchError::Io {
        path: path.display().to_string(),
        source,
    };

    let text = fs::read_to_string(path).map_err(io_err)?;
    let descriptor = BuildDescriptor::locate(text, &config.anchor)?;
    tracing::debug!(
        "{}: setup body spans {}..{}",
        path.display(),
        descriptor.insertion_start(),
        descriptor.body_end()
    );
    let patched = descriptor.patch(desired, candidates, |name| config.declaration_for(name));
    fs::write(path, patched).map_err(io_err)?;

    tracing::info!(
        "patched {} with {} dependencies",
        path.display(),
        desired.len()
    );
    Ok(())
}

/// Module names of installed entries, and of every catalog entry.
fn module_sets<'a>(
    catalog: &'a Catalog,
    installed: &InstalledSet,
    pick: fn(&PluginCatalogEntry) -> Option<&str>,
) -> (Vec<&'a str>, Vec<&'a str>) {
    let desired = installed
        .iter()
        .filter_map(|id| catalog.get(id).and_then(pick))
        .collect();
    let candidates = catalog.iter().filter_map(|(_, entry)| pick(entry)).collect();
    (desired, candidates)
}

/// Patch the game build file, and the editor one when the project has an
/// editor target and the catalog knows editor modules.
pub fn patch_project(
    project_dir: &Path,
    manifest: &ProjectManifest,
    catalog: &Catalog,
    installed: &InstalledSet,
    config: &PatcherConfig,
) -> Vec<PatchOutcome> {
    let mut outcomes = Vec::new();

    let (desired, candidates) = module_sets(catalog, installed, PluginCatalogEntry::module_name);
    let result = resolve_build_file(
        project_dir,
        manifest.game_target(),
        Some(config.default_target.as_str()),
    )
    .and_then(|path| patch_build_file(&path, &desired, &candidates, config).map(|()| path));
    outcomes.push(PatchOutcome {
        kind: TargetKind::Game,
        result,
    });

    if let Some(editor_target) = manifest.game_target_editor()
        && catalog.has_editor_modules()
    {
        let (desired, candidates) =
            module_sets(catalog, installed, PluginCatalogEntry::editor_module_name);
        let result = resolve_build_file(project_dir, Some(editor_target), None).and_then(|path| {
            patch_build_file(&path, &desired, &candidates, config).map(|()| path)
        });
        outcomes.push(PatchOutcome {
            kind: TargetKind::Editor,
            result,
        });
    }

    for outcome in &outcomes {
        if let Err(err) = &outcome.result {
            tracing::warn!("{} build file not patched: {err}", outcome.kind.label());
        }
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::catalog::PluginId;
    use crate::model::config::AppConfig;

    const ANCHOR: &str = "public override void Setup(BuildOptions options)";

    const BUILD: &str = "using Flax.Build;\n\npublic class Game : GameModule\n{\n    /// <inheritdoc />\n    public override void Setup(BuildOptions options)\n    {\n        base.Setup(options);\n        options.PrivateDependencies.Add(\"Old\");\n        if (options.Target != null)\n        {\n            options.PrivateDependencies.Add(\"A\");\n        }\n        options.ScriptingAPI.IgnoreMissingDocumentationWarnings = true;\n    }\n\n    public override void Init()\n    {\n    }\n}\n";

    fn declaration(name: &str) -> String {
        format!("        options.PrivateDependencies.Add(\"{name}\");")
    }

    fn count(text: &str, name: &str) -> usize {
        text.matches(&format!("\"{name}\"")).count()
    }

    #[test]
    fn locates_body_with_brace_on_next_line() {
        let descriptor = BuildDescriptor::locate(BUILD.to_string(), ANCHOR).unwrap();
        assert!(descriptor.body().starts_with("        base.Setup(options);\n"));
        assert!(descriptor.body().ends_with("= true;\n    "));
        assert_eq!(&BUILD[descriptor.body_end()..descriptor.body_end() + 1], "}");
    }

    #[test]
    fn locates_body_with_brace_on_same_line() {
        let text = "class G {\n    public override void Setup(BuildOptions options) {\n        base.Setup(options);\n    }\n}\n";
        let descriptor = BuildDescriptor::locate(text.to_string(), ANCHOR).unwrap();
        assert_eq!(descriptor.body(), "        base.Setup(options);\n    ");
    }

    #[test]
    fn patch_declares_exactly_the_desired_set() {
        let descriptor = BuildDescriptor::locate(BUILD.to_string(), ANCHOR).unwrap();
        let patched = descriptor.patch(&["A", "B"], &["A", "B", "Old"], declaration);

        let start = descriptor.insertion_start();
        assert_eq!(&patched[..start], &BUILD[..start]);
        let tail = &BUILD[descriptor.body_end()..];
        assert!(patched.ends_with(tail));

        let body = &patched[start..patched.len() - tail.len()];
        assert_eq!(count(body, "A"), 1);
        assert_eq!(count(body, "B"), 1);
        assert_eq!(count(body, "Old"), 0);
        assert!(body.starts_with(
            "        options.PrivateDependencies.Add(\"A\");\n        options.PrivateDependencies.Add(\"B\");\n        base.Setup(options);\n"
        ));
        assert!(body.contains("IgnoreMissingDocumentationWarnings"));
    }

    #[test]
    fn patch_is_stable_when_repeated() {
        let first = BuildDescriptor::locate(BUILD.to_string(), ANCHOR)
            .unwrap()
            .patch(&["A"], &["A", "Old"], declaration);
        let second = BuildDescriptor::locate(first.clone(), ANCHOR)
            .unwrap()
            .patch(&["A"], &["A", "Old"], declaration);
        assert_eq!(first, second);
    }

    #[test]
    fn keeps_crlf_line_endings() {
        let text = BUILD.replace('\n', "\r\n");
        let patched = BuildDescriptor::locate(text, ANCHOR)
            .unwrap()
            .patch(&["Z"], &["Z"], declaration);
        assert!(patched.contains("Add(\"Z\");\r\n"));
        assert!(!patched.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn failure_modes() {
        assert!(matches!(
            BuildDescriptor::locate("class G {}\n".to_string(), ANCHOR),
            Err(PatchError::AnchorNotFound)
        ));

        let unclosed = format!("{ANCHOR}\n{{\n    base.Setup(options);\n");
        assert!(matches!(
            BuildDescriptor::locate(unclosed, ANCHOR),
            Err(PatchError::Unbalanced)
        ));

        let no_brace = format!("{ANCHOR}\n    base.Setup(options);\n}}\n");
        assert!(matches!(
            BuildDescriptor::locate(no_brace, ANCHOR),
            Err(PatchError::OpeningBraceMissing)
        ));

        let one_line = format!("{ANCHOR} {{ }}\n");
        assert!(matches!(
            BuildDescriptor::locate(one_line, ANCHOR),
            Err(PatchError::SingleLineBody)
        ));
    }

    #[test]
    fn brace_in_string_literal_is_counted() {
        // Known limitation: a stray brace in a string shifts the body end.
        let text = format!("{ANCHOR}\n{{\n    Log(\"}}\");\n    Other();\n}}\n");
        let descriptor = BuildDescriptor::locate(text, ANCHOR).unwrap();
        assert_eq!(descriptor.body(), "    Log(\"");
    }

    #[test]
    fn build_file_resolution_falls_back_to_default() {
        let project = tempfile::tempdir().unwrap();
        let game = project.path().join("Source/Game");
        fs::create_dir_all(&game).unwrap();
        fs::write(game.join("Game.Build.cs"), BUILD).unwrap();

        let path = resolve_build_file(project.path(), Some("MyGameTarget"), Some("Game")).unwrap();
        assert!(path.ends_with("Source/Game/Game.Build.cs"));

        let custom = project.path().join("Source/MyGame");
        fs::create_dir_all(&custom).unwrap();
        fs::write(custom.join("MyGame.Build.cs"), BUILD).unwrap();
        let path = resolve_build_file(project.path(), Some("MyGameTarget"), Some("Game")).unwrap();
        assert!(path.ends_with("Source/MyGame/MyGame.Build.cs"));

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_build_file(empty.path(), Some("MyGameTarget"), Some("Game")),
            Err(PatchError::BuildFileMissing { tried }) if tried.len() == 2
        ));
    }

    #[test]
    fn patch_project_updates_game_and_editor_files() {
        let project = tempfile::tempdir().unwrap();
        for name in ["Game", "GameEditor"] {
            let dir = project.path().join("Source").join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("{name}.Build.cs")), BUILD).unwrap();
        }

        let entry = |name: &str, editor: Option<&str>| PluginCatalogEntry {
            name: name.to_string(),
            url: format!("https://github.com/x/{name}"),
            project_file: format!("{name}.flaxproj"),
            module_name: Some(name.to_string()),
            editor_module_name: editor.map(str::to_string),
            branch: None,
            description: String::new(),
        };
        let catalog =
            Catalog::new(vec![entry("A", Some("AEditor")), entry("B", None)]).unwrap();
        let mut installed = InstalledSet::new();
        installed.insert(PluginId(0));

        let manifest = ProjectManifest::parse(
            r#"{"GameTarget": "GameTarget", "GameTargetEditor": "GameEditorTarget", "References": []}"#,
        )
        .unwrap();
        let config = AppConfig::defaults().unwrap().patcher;

        let outcomes = patch_project(project.path(), &manifest, &catalog, &installed, &config);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(PatchOutcome::is_ok));

        let game = fs::read_to_string(project.path().join("Source/Game/Game.Build.cs")).unwrap();
        assert_eq!(count(&game, "A"), 1);
        assert_eq!(count(&game, "AEditor"), 0);
        assert_eq!(count(&game, "Old"), 1);

        let editor =
            fs::read_to_string(project.path().join("Source/GameEditor/GameEditor.Build.cs"))
                .unwrap();
        assert_eq!(count(&editor, "AEditor"), 1);
        // Game modules are not managed in the editor file.
        assert_eq!(count(&editor, "A"), 1);
    }
}
