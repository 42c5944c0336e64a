// src/test_support.rs

//! In-memory stand-in for the host used by unit tests
//!
//! `FakeSystem` implements [`CommandRunner`] and keeps a small user and
//! group database. It understands the handful of commands divban issues
//! (`getent`, `useradd`, `userdel`, `loginctl`, `chown`, `sysctl`) and
//! records every invocation. Filesystem effects (home directories, linger
//! markers, sysctl values) land under a private temp root.

use crate::paths::SystemPaths;
use crate::process::{CommandOutput, CommandRunner, ExecOptions};
use crate::settings::Settings;
use crate::user::PasswdEntry;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct FakeState {
    passwd: Vec<PasswdEntry>,
    groups: Vec<(String, u32)>,
    calls: Vec<Vec<String>>,
    /// useradd reports "UID not unique" this many more times
    uid_conflicts: u32,
    failing: HashSet<String>,
}

pub struct FakeSystem {
    root: TempDir,
    state: Mutex<FakeState>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn paths(&self) -> SystemPaths {
        SystemPaths::new(self.root.path())
    }

    /// Settings pointing every path at the fake root
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.paths.root = self.root();
        settings.paths.lock_dir = self.root.path().join("run/lock/divban");
        settings.users.home_base = self.root.path().join("srv");
        settings.retry.base_delay_ms = 1;
        settings.retry.max_delay_ms = 4;
        settings
    }

    pub fn add_user(&self, name: &str, uid: u32, home: &str, shell: &str) {
        let mut state = self.state.lock().unwrap();
        state.passwd.push(PasswdEntry {
            name: name.to_string(),
            uid,
            gid: uid,
            home: PathBuf::from(home),
            shell: shell.to_string(),
        });
        state.groups.push((name.to_string(), uid));
    }

    pub fn add_group(&self, name: &str, gid: u32) {
        self.state
            .lock()
            .unwrap()
            .groups
            .push((name.to_string(), gid));
    }

    pub fn user(&self, name: &str) -> Option<PasswdEntry> {
        self.state
            .lock()
            .unwrap()
            .passwd
            .iter()
            .find(|e| e.name == name)
            .cloned()
    }

    /// Make the next `count` useradd calls collide with an outside actor
    pub fn set_uid_conflicts(&self, count: u32) {
        self.state.lock().unwrap().uid_conflicts = count;
    }

    /// Make every invocation of `program` fail
    pub fn fail_program(&self, program: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(program.to_string());
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| argv.first().map(String::as_str) == Some(program))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn getent(&self, state: &FakeState, args: &[String]) -> CommandOutput {
        match args {
            [db] if db == "passwd" => CommandOutput::ok(
                state
                    .passwd
                    .iter()
                    .map(render_passwd)
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            [db, name] if db == "passwd" => match state.passwd.iter().find(|e| &e.name == name) {
                Some(entry) => CommandOutput::ok(render_passwd(entry)),
                None => CommandOutput::failed(2, ""),
            },
            [db] if db == "group" => CommandOutput::ok(
                state
                    .groups
                    .iter()
                    .map(|(name, gid)| format!("{}:x:{}:\n", name, gid))
                    .collect::<String>(),
            ),
            _ => CommandOutput::failed(1, "unsupported getent query"),
        }
    }

    fn useradd(&self, state: &mut FakeState, args: &[String]) -> CommandOutput {
        let flag = |name: &str| {
            args.iter()
                .position(|a| a == name)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };
        let Some(username) = args.last().cloned() else {
            return CommandOutput::failed(2, "useradd: missing username");
        };
        let Some(uid) = flag("--uid").and_then(|u| u.parse::<u32>().ok()) else {
            return CommandOutput::failed(2, "useradd: missing --uid");
        };
        let home = PathBuf::from(flag("--home-dir").unwrap_or_default());
        let shell = flag("--shell").unwrap_or_default();

        if state.uid_conflicts > 0 {
            // Somebody outside divban grabbed the UID in the meantime
            state.uid_conflicts -= 1;
            let intruder = format!("intruder{}", uid);
            state.passwd.push(PasswdEntry {
                name: intruder.clone(),
                uid,
                gid: uid,
                home: PathBuf::from("/home").join(&intruder),
                shell: "/bin/bash".to_string(),
            });
            state.groups.push((intruder, uid));
            return CommandOutput::failed(4, format!("useradd: UID {} is not unique", uid));
        }
        if state.passwd.iter().any(|e| e.name == username) {
            return CommandOutput::failed(9, format!("useradd: user '{}' already exists", username));
        }
        if state.passwd.iter().any(|e| e.uid == uid) {
            return CommandOutput::failed(4, format!("useradd: UID {} is not unique", uid));
        }

        if args.iter().any(|a| a == "--create-home") {
            fs::create_dir_all(&home).unwrap();
        }
        state.passwd.push(PasswdEntry {
            name: username.clone(),
            uid,
            gid: uid,
            home,
            shell,
        });
        state.groups.push((username, uid));
        CommandOutput::ok("")
    }

    fn userdel(&self, state: &mut FakeState, args: &[String]) -> CommandOutput {
        let Some(username) = args.last() else {
            return CommandOutput::failed(2, "userdel: missing username");
        };
        let Some(pos) = state.passwd.iter().position(|e| &e.name == username) else {
            return CommandOutput::failed(6, format!("userdel: user '{}' does not exist", username));
        };
        let entry = state.passwd.remove(pos);
        state.groups.retain(|(name, _)| name != username);
        if args.iter().any(|a| a == "--remove") && entry.home.exists() {
            fs::remove_dir_all(&entry.home).unwrap();
        }
        CommandOutput::ok("")
    }

    fn loginctl(&self, args: &[String]) -> CommandOutput {
        let linger_dir = self.paths().linger_dir();
        match args {
            [action, user] if action == "enable-linger" => {
                fs::create_dir_all(&linger_dir).unwrap();
                fs::write(linger_dir.join(user), "").unwrap();
                CommandOutput::ok("")
            }
            [action, user] if action == "disable-linger" => {
                let _ = fs::remove_file(linger_dir.join(user));
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(1, "unsupported loginctl call"),
        }
    }

    fn sysctl(&self, args: &[String]) -> CommandOutput {
        match args {
            [flag, setting] if flag == "-w" => {
                let Some((key, value)) = setting.split_once('=') else {
                    return CommandOutput::failed(1, "sysctl: bad setting");
                };
                let path = self.paths().proc_sys(key);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, format!("{}\n", value)).unwrap();
                CommandOutput::ok(format!("{} = {}\n", key, value))
            }
            _ => CommandOutput::failed(1, "unsupported sysctl call"),
        }
    }
}

impl Default for FakeSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn render_passwd(entry: &PasswdEntry) -> String {
    format!(
        "{}:x:{}:{}::{}:{}\n",
        entry.name,
        entry.uid,
        entry.gid,
        entry.home.display(),
        entry.shell
    )
}

impl CommandRunner for FakeSystem {
    fn exec(&self, argv: &[&str], _opts: &ExecOptions) -> crate::Result<CommandOutput> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let mut state = self.state.lock().unwrap();
        state.calls.push(argv.clone());

        let (program, args) = argv.split_first().unwrap();
        if state.failing.contains(program) {
            return Ok(CommandOutput::failed(1, format!("{}: forced failure", program)));
        }

        let output = match program.as_str() {
            "getent" => self.getent(&state, args),
            "useradd" => self.useradd(&mut state, args),
            "userdel" => self.userdel(&mut state, args),
            "loginctl" => self.loginctl(args),
            "sysctl" => self.sysctl(args),
            "chown" => CommandOutput::ok(""),
            other => CommandOutput::failed(127, format!("{}: command not found", other)),
        };
        Ok(output)
    }
}
