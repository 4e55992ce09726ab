// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Project type detection
//
// Marker-file scoring over the project root: every marker file found adds 2,
// every marker directory adds 1, the highest scoring language wins (earlier
// rules win ties). Package manager comes from lockfiles; frameworks from
// their config files and declared dependencies.

use std::path::Path;

use crate::domain::project::ProjectType;

struct LanguageRule {
    language: &'static str,
    files: &'static [&'static str],
    directories: &'static [&'static str],
}

const LANGUAGE_RULES: &[LanguageRule] = &[
    LanguageRule { language: "rust", files: &["Cargo.toml"], directories: &["src"] },
    LanguageRule { language: "go", files: &["go.mod", "go.sum"], directories: &["cmd", "internal"] },
    LanguageRule { language: "typescript", files: &["tsconfig.json"], directories: &["src"] },
    LanguageRule { language: "javascript", files: &["package.json"], directories: &["src", "lib"] },
    LanguageRule {
        language: "python",
        files: &["pyproject.toml", "requirements.txt", "setup.py", "Pipfile"],
        directories: &["src", "app"],
    },
    LanguageRule {
        language: "java",
        files: &["pom.xml", "build.gradle", "build.gradle.kts"],
        directories: &["src/main", "src/test"],
    },
];

/// Lockfiles first so `package.json` alone falls back to npm.
const PACKAGE_MANAGERS: &[(&str, &str)] = &[
    ("Cargo.toml", "cargo"),
    ("pnpm-lock.yaml", "pnpm"),
    ("yarn.lock", "yarn"),
    ("bun.lockb", "bun"),
    ("package-lock.json", "npm"),
    ("package.json", "npm"),
    ("poetry.lock", "poetry"),
    ("Pipfile", "pipenv"),
    ("pyproject.toml", "pip"),
    ("requirements.txt", "pip"),
    ("go.mod", "go"),
    ("pom.xml", "maven"),
    ("build.gradle", "gradle"),
    ("build.gradle.kts", "gradle"),
];

const FRAMEWORK_FILES: &[(&str, &str)] = &[
    ("next.config.js", "nextjs"),
    ("next.config.mjs", "nextjs"),
    ("next.config.ts", "nextjs"),
    ("manage.py", "django"),
    ("src/main/resources/application.properties", "spring"),
    ("src/main/resources/application.yml", "spring"),
    ("Dockerfile", "docker"),
    ("docker-compose.yml", "docker"),
    ("docker-compose.yaml", "docker"),
    (".taskmaster", "taskmaster"),
];

const NODE_FRAMEWORKS: &[(&str, &str)] = &[
    ("next", "nextjs"),
    ("react", "react"),
    ("vue", "vue"),
    ("@angular/core", "angular"),
    ("express", "express"),
];

const PYTHON_FRAMEWORKS: &[(&str, &str)] = &[("django", "django"), ("fastapi", "fastapi"), ("flask", "flask")];

/// Detect the project type of `root`, or `None` when nothing is recognised.
pub fn detect_project_type(root: &Path) -> Option<ProjectType> {
    let language = LANGUAGE_RULES
        .iter()
        .map(|rule| (rule, score(root, rule)))
        .filter(|(_, score)| *score > 0)
        // max_by_key keeps the last maximum; reverse to prefer earlier rules
        .rev()
        .max_by_key(|(_, score)| *score)
        .map(|(rule, _)| rule.language);

    let package_manager = PACKAGE_MANAGERS
        .iter()
        .find(|(marker, _)| root.join(marker).exists())
        .map(|(_, pm)| pm.to_string());

    let mut frameworks: Vec<String> = Vec::new();
    let mut add = |name: &str| {
        if !frameworks.iter().any(|f| f == name) {
            frameworks.push(name.to_string());
        }
    };
    for (marker, framework) in FRAMEWORK_FILES {
        if root.join(marker).exists() {
            add(framework);
        }
    }
    for framework in node_frameworks(root) {
        add(framework);
    }
    for framework in python_frameworks(root) {
        add(framework);
    }
    frameworks.sort();

    if language.is_none() && frameworks.is_empty() {
        return None;
    }

    Some(ProjectType {
        language: language.unwrap_or("generic").to_string(),
        package_manager,
        frameworks,
    })
}

fn score(root: &Path, rule: &LanguageRule) -> u32 {
    let files = rule.files.iter().filter(|f| root.join(f).is_file()).count() as u32;
    if files == 0 {
        // Directories alone (e.g. `src/`) say nothing about the language
        return 0;
    }
    let dirs = rule.directories.iter().filter(|d| root.join(d).is_dir()).count() as u32;
    files * 2 + dirs
}

fn node_frameworks(root: &Path) -> Vec<&'static str> {
    let Ok(content) = std::fs::read_to_string(root.join("package.json")) else {
        return Vec::new();
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&content) else {
        return Vec::new();
    };
    let declared = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| manifest.get(section).and_then(|deps| deps.get(name)).is_some())
    };
    NODE_FRAMEWORKS.iter().filter(|(dep, _)| declared(dep)).map(|(_, framework)| *framework).collect()
}

fn python_frameworks(root: &Path) -> Vec<&'static str> {
    let mut content = String::new();
    for file in ["requirements.txt", "pyproject.toml", "Pipfile"] {
        if let Ok(text) = std::fs::read_to_string(root.join(file)) {
            content.push_str(&text.to_ascii_lowercase());
            content.push('\n');
        }
    }
    PYTHON_FRAMEWORKS
        .iter()
        .filter(|(dep, _)| content.contains(dep))
        .map(|(_, framework)| *framework)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_rust_project() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();

        let detected = detect_project_type(dir.path()).unwrap();
        assert_eq!(detected.language, "rust");
        assert_eq!(detected.package_manager.as_deref(), Some("cargo"));
        assert!(detected.frameworks.is_empty());
    }

    #[test]
    fn test_nextjs_project_with_yarn() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"next": "14.0.0", "react": "18.2.0"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();
        fs::write(dir.path().join("yarn.lock"), "").unwrap();
        fs::write(dir.path().join("next.config.js"), "module.exports = {}").unwrap();

        let detected = detect_project_type(dir.path()).unwrap();
        assert_eq!(detected.language, "typescript");
        assert_eq!(detected.package_manager.as_deref(), Some("yarn"));
        assert_eq!(detected.frameworks, vec!["nextjs".to_string(), "react".to_string()]);
    }

    #[test]
    fn test_python_framework_from_requirements() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "FastAPI==0.110\nuvicorn\n").unwrap();

        let detected = detect_project_type(dir.path()).unwrap();
        assert_eq!(detected.language, "python");
        assert_eq!(detected.package_manager.as_deref(), Some("pip"));
        assert_eq!(detected.frameworks, vec!["fastapi".to_string()]);
    }

    #[test]
    fn test_docker_only_is_generic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let detected = detect_project_type(dir.path()).unwrap();
        assert_eq!(detected.language, "generic");
        assert_eq!(detected.frameworks, vec!["docker".to_string()]);
    }

    #[test]
    fn test_empty_dir_is_undetected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        assert!(detect_project_type(dir.path()).is_none());
    }
}
