//! Turns a script path and its raw parameter string into a command vector.

use crate::error::ExecutionError;
use std::path::{Path, PathBuf};
use std::process::Stdio;

const GIT_BASH_PATHS: [&str; 2] = [
    r"C:\Program Files\Git\bin\bash.exe",
    r"C:\Program Files (x86)\Git\bin\bash.exe",
];

/// Host family used to pick a launcher for a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(unix) {
            Platform::Unix
        } else {
            Platform::Other
        }
    }
}

/// Builds the command for `script_path` on the current host.
pub fn build_command(
    script_path: &Path,
    parameters: Option<&str>,
) -> Result<Vec<String>, ExecutionError> {
    build_command_for(Platform::current(), script_path, parameters)
}

pub fn build_command_for(
    platform: Platform,
    script_path: &Path,
    parameters: Option<&str>,
) -> Result<Vec<String>, ExecutionError> {
    if !script_path.is_file() {
        return Err(ExecutionError::ScriptNotFound(script_path.to_path_buf()));
    }

    ensure_executable(script_path);

    let script = script_path.to_string_lossy().to_string();
    let extension = script_path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

    let mut command = match platform {
        Platform::Unix => unix_launcher(extension.as_deref(), script),
        Platform::Windows => windows_launcher(extension.as_deref(), script),
        Platform::Other => {
            tracing::warn!(
                script = %script,
                "Unknown operating system, attempting direct execution"
            );
            vec![script]
        }
    };

    command.extend(split_parameters(parameters));

    tracing::debug!(command = %command.join(" "), "Built command");
    Ok(command)
}

/// Whitespace-tokenizes the raw parameter string. Blank input yields no arguments.
pub fn split_parameters(parameters: Option<&str>) -> Vec<String> {
    parameters
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn unix_launcher(extension: Option<&str>, script: String) -> Vec<String> {
    // Extensionless files are treated as shell scripts; a shebang is not required.
    let interpreter = match extension {
        None | Some("sh") | Some("bash") => Some("bash"),
        Some("py") => Some("python3"),
        Some("pl") => Some("perl"),
        Some("rb") => Some("ruby"),
        _ => None,
    };

    match interpreter {
        Some(interpreter) => vec![interpreter.to_string(), script],
        None => vec![script],
    }
}

fn windows_launcher(extension: Option<&str>, script: String) -> Vec<String> {
    match extension {
        Some("bat") | Some("cmd") => vec!["cmd.exe".to_string(), "/c".to_string(), script],
        Some("ps1") => vec![
            "powershell.exe".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-File".to_string(),
            script,
        ],
        Some("py") => vec!["python".to_string(), script],
        Some("sh") => windows_shell_launcher(script, wsl_available(), find_git_bash()),
        _ => vec![script],
    }
}

/// WSL first, then Git Bash, then a direct attempt that will most likely fail.
fn windows_shell_launcher(script: String, wsl: bool, git_bash: Option<PathBuf>) -> Vec<String> {
    if wsl {
        return vec!["wsl".to_string(), "bash".to_string(), script];
    }
    if let Some(bash) = git_bash {
        return vec![bash.to_string_lossy().to_string(), script];
    }

    tracing::warn!(
        script = %script,
        "No suitable shell found for .sh file on Windows, direct execution will likely fail"
    );
    vec![script]
}

fn wsl_available() -> bool {
    match std::process::Command::new("wsl")
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::debug!("WSL is not available: {}", e);
            false
        }
    }
}

fn find_git_bash() -> Option<PathBuf> {
    GIT_BASH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

#[cfg(unix)]
fn ensure_executable(script_path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(script_path) {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!(script = %script_path.display(), "Failed to read permissions: {}", e);
            return;
        }
    };

    let mut permissions = metadata.permissions();
    let mode = permissions.mode();
    if mode & 0o111 == 0o111 {
        return;
    }

    tracing::info!(
        script = %script_path.display(),
        "Script file is not executable, setting executable permission"
    );
    permissions.set_mode(mode | 0o111);
    if let Err(e) = std::fs::set_permissions(script_path, permissions) {
        tracing::warn!(
            script = %script_path.display(),
            "Failed to set executable permission: {}",
            e
        );
    }
}

#[cfg(not(unix))]
fn ensure_executable(_script_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "#!/bin/sh\necho hello\n").unwrap();
        path
    }

    #[test]
    fn missing_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-exists.sh");

        let err = build_command_for(Platform::Unix, &missing, None).unwrap_err();
        assert!(matches!(err, ExecutionError::ScriptNotFound(path) if path == missing));
    }

    #[test]
    fn unix_shell_script_uses_bash_and_splits_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "test.sh");

        let command =
            build_command_for(Platform::Unix, &path, Some("--param   value")).unwrap();
        assert_eq!(
            command,
            vec![
                "bash".to_string(),
                path.to_string_lossy().to_string(),
                "--param".to_string(),
                "value".to_string(),
            ]
        );
    }

    #[test]
    fn unix_interpreters_follow_extension() {
        let dir = tempfile::tempdir().unwrap();
        for (name, interpreter) in [("a.py", "python3"), ("b.PL", "perl"), ("c.rb", "ruby")] {
            let path = script(&dir, name);
            let command = build_command_for(Platform::Unix, &path, None).unwrap();
            assert_eq!(command[0], interpreter, "for {}", name);
            assert_eq!(command.len(), 2);
        }
    }

    #[test]
    fn executables_run_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "test.exe");

        let command = build_command_for(Platform::Unix, &path, Some("param1 param2")).unwrap();
        assert_eq!(
            command,
            vec![
                path.to_string_lossy().to_string(),
                "param1".to_string(),
                "param2".to_string(),
            ]
        );
    }

    #[test]
    fn blank_parameters_add_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "test.exe");

        for params in [None, Some(""), Some("   \t ")] {
            let command = build_command_for(Platform::Unix, &path, params).unwrap();
            assert_eq!(command, vec![path.to_string_lossy().to_string()]);
        }
    }

    #[test]
    fn unix_extensionless_script_runs_under_bash() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "nightly");

        let command = build_command_for(Platform::Unix, &path, Some("--full")).unwrap();
        assert_eq!(
            command,
            vec![
                "bash".to_string(),
                path.to_string_lossy().to_string(),
                "--full".to_string(),
            ]
        );
    }

    #[test]
    fn windows_shell_scripts_prefer_wsl_then_git_bash() {
        let script = r"C:\jobs\run.sh".to_string();
        let git_bash = PathBuf::from(GIT_BASH_PATHS[0]);

        assert_eq!(
            windows_shell_launcher(script.clone(), true, Some(git_bash.clone())),
            vec!["wsl".to_string(), "bash".to_string(), script.clone()]
        );
        assert_eq!(
            windows_shell_launcher(script.clone(), false, Some(git_bash.clone())),
            vec![git_bash.to_string_lossy().to_string(), script.clone()]
        );
        assert_eq!(
            windows_shell_launcher(script.clone(), false, None),
            vec![script]
        );
    }

    #[test]
    fn windows_launchers_follow_extension() {
        let dir = tempfile::tempdir().unwrap();

        let bat = script(&dir, "test.bat");
        let command = build_command_for(Platform::Windows, &bat, Some("/param_value")).unwrap();
        assert_eq!(command[..2], ["cmd.exe".to_string(), "/c".to_string()]);
        assert_eq!(command[3], "/param_value");

        let ps1 = script(&dir, "test.ps1");
        let command = build_command_for(Platform::Windows, &ps1, None).unwrap();
        assert_eq!(command[0], "powershell.exe");
        assert_eq!(command[4], ps1.to_string_lossy());

        let py = script(&dir, "test.py");
        let command = build_command_for(Platform::Windows, &py, None).unwrap();
        assert_eq!(command[0], "python");
    }

    #[test]
    fn unknown_platform_runs_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "test.sh");

        let command = build_command_for(Platform::Other, &path, Some("a b")).unwrap();
        assert_eq!(command.len(), 3);
        assert_eq!(command[0], path.to_string_lossy());
    }

    #[cfg(unix)]
    #[test]
    fn script_is_made_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "test.sh");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        build_command_for(Platform::Unix, &path, None).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
