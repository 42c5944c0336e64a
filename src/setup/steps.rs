// src/setup/steps.rs

//! The provisioning saga
//!
//! Steps, in order:
//!
//! 1. unprivileged low ports (only for services that publish 80/443)
//! 2. service user (create or verify)
//! 3. linger
//! 4. home directory tree
//! 5. service configuration
//! 6. service-specific setup
//!
//! Compensation always branches on what this run did (`was_created`, the
//! list of directories it made, the config backup it took), never on what
//! happens to exist at rollback time.

use super::{SagaOutcome, SetupStep, StepState, run_setup_saga};
use crate::error::{Error, Result};
use crate::filesystem::{atomic_write, chown_path, set_mode};
use crate::paths::SystemPaths;
use crate::process::CommandRunner;
use crate::progress::SetupProgress;
use crate::service::{NoopSetup, ServiceDefinition, ServiceSetup, ServiceSetupContext};
use crate::settings::Settings;
use crate::system::{disable_linger, enable_linger, ensure_unprivileged_ports, sysctl};
use crate::user::{Acquired, ServiceUser, UserManager, username_for_service};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Mode of directories created in a service home
pub const DIR_MODE: u32 = 0o750;

/// Mode of the installed service configuration
pub const CONFIG_MODE: u32 = 0o640;

/// Directories every service home gets, relative to the home
const STANDARD_DIRS: &[&str] = &[
    "data",
    ".config",
    ".config/divban",
    ".config/containers",
    ".config/containers/systemd",
];

/// Everything the provisioning steps need
pub struct ProvisionContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub settings: &'a Settings,
    pub service: &'a ServiceDefinition,
    /// Validated configuration file to install
    pub config_source: &'a Path,
    pub service_setup: &'a dyn ServiceSetup,
}

impl<'a> ProvisionContext<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        settings: &'a Settings,
        service: &'a ServiceDefinition,
        config_source: &'a Path,
    ) -> Self {
        Self {
            runner,
            settings,
            service,
            config_source,
            service_setup: &NoopSetup,
        }
    }

    pub fn with_service_setup(mut self, service_setup: &'a dyn ServiceSetup) -> Self {
        self.service_setup = service_setup;
        self
    }

    pub fn users(&self) -> UserManager<'a> {
        UserManager::new(self.runner, self.settings)
    }

    pub fn paths(&self) -> SystemPaths {
        self.settings.system_paths()
    }
}

/// The installed configuration file and the backup taken of its predecessor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigInstall {
    pub target: PathBuf,
    pub backup: Option<PathBuf>,
}

impl ConfigInstall {
    /// Put the previous file back, or remove ours if there was none
    pub fn restore(&self) -> Result<()> {
        match &self.backup {
            Some(backup) => {
                fs::rename(backup, &self.target).map_err(|e| Error::io(&self.target, e))?;
                info!("Restored previous {}", self.target.display());
            }
            None => remove_if_exists(&self.target)?,
        }
        Ok(())
    }

    /// Drop the backup once the new file is final
    pub fn discard_backup(&self) -> Result<()> {
        if let Some(backup) = &self.backup {
            remove_if_exists(backup)?;
            debug!("Removed backup {}", backup.display());
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// State accumulated by the provisioning saga
#[derive(Debug, Clone, Default)]
pub struct ProvisionState {
    /// `Some(changed)` once the port setting step ran
    pub ports_configured: Option<bool>,
    pub user: Option<Acquired<ServiceUser>>,
    pub linger: Option<Acquired<()>>,
    /// Directories this run created, in creation order
    pub directories: Vec<PathBuf>,
    pub config: Option<ConfigInstall>,
    pub service_ready: bool,
}

#[derive(Debug, Clone)]
pub enum ProvisionUpdate {
    Ports(bool),
    User(Acquired<ServiceUser>),
    Linger(Acquired<()>),
    Directories(Vec<PathBuf>),
    Config(ConfigInstall),
    ServiceReady,
}

impl StepState for ProvisionState {
    type Update = ProvisionUpdate;

    fn merge(&mut self, update: ProvisionUpdate) {
        match update {
            ProvisionUpdate::Ports(changed) => self.ports_configured = Some(changed),
            ProvisionUpdate::User(user) => self.user = Some(user),
            ProvisionUpdate::Linger(linger) => self.linger = Some(linger),
            ProvisionUpdate::Directories(dirs) => self.directories = dirs,
            ProvisionUpdate::Config(config) => self.config = Some(config),
            ProvisionUpdate::ServiceReady => self.service_ready = true,
        }
    }
}

impl ProvisionState {
    pub fn service_user(&self) -> Option<&ServiceUser> {
        self.user.as_ref().map(|acquired| &acquired.value)
    }
}

fn require_user<'s>(state: &'s ProvisionState, service: &ServiceDefinition) -> Result<&'s ServiceUser> {
    state
        .service_user()
        .ok_or_else(|| Error::UserNotFound(format!("{}{}", crate::user::USERNAME_PREFIX, service.name)))
}

/// Why root is needed for this setup, `None` if it is not
///
/// Root is needed to create the account, and for port-publishing services
/// to change the port setting when it is not already in place.
pub fn privileges_required(ctx: &ProvisionContext<'_>) -> Result<Option<String>> {
    let username = username_for_service(&ctx.service.name)?;
    if !ctx.users().allocator().user_exists(&username)? {
        return Ok(Some(format!("user '{}' must be created", username)));
    }
    if ctx.service.needs_privileged_ports && !sysctl::unprivileged_ports_configured(&ctx.paths())? {
        return Ok(Some(format!(
            "{} must be lowered to {}",
            sysctl::UNPRIVILEGED_PORT_KEY,
            sysctl::REQUIRED_PORT_START
        )));
    }
    Ok(None)
}

/// Fail early with `RootRequired` instead of partway through the saga
pub fn check_privileges(ctx: &ProvisionContext<'_>) -> Result<()> {
    match privileges_required(ctx)? {
        Some(reason) if !nix::unistd::geteuid().is_root() => Err(Error::RootRequired(reason)),
        _ => Ok(()),
    }
}

/// Directories a service home must contain, outermost first
pub fn service_directories(user: &ServiceUser, service: &ServiceDefinition) -> Vec<PathBuf> {
    let mut dirs = vec![user.home_dir.clone()];
    dirs.extend(STANDARD_DIRS.iter().map(|dir| user.home_dir.join(dir)));
    dirs.extend(service.data_dirs.iter().map(|dir| user.home_dir.join(dir)));
    dirs
}

/// Create the missing ones among `dirs`, owned by the service user
///
/// Returns exactly the directories created, in creation order. On failure
/// this call's own creations are removed before the error is returned.
pub fn create_service_directories(
    runner: &dyn CommandRunner,
    user: &ServiceUser,
    dirs: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    match create_tracked(runner, user, dirs, &mut created) {
        Ok(()) => Ok(created),
        Err(e) => {
            remove_created_directories(&created);
            Err(e)
        }
    }
}

fn create_tracked(
    runner: &dyn CommandRunner,
    user: &ServiceUser,
    dirs: &[PathBuf],
    created: &mut Vec<PathBuf>,
) -> Result<()> {
    for dir in dirs {
        // Never create or chown anything above the home
        let missing: Vec<&Path> = dir
            .ancestors()
            .take_while(|path| path.starts_with(&user.home_dir) && !path.exists())
            .collect();

        for path in missing.into_iter().rev() {
            fs::create_dir(path).map_err(|e| Error::io(path, e))?;
            created.push(path.to_path_buf());
            set_mode(path, DIR_MODE)?;
            chown_path(runner, path, user.uid, user.gid)?;
            debug!("Created directory '{}'", path.display());
        }
    }
    Ok(())
}

/// Remove directories in reverse creation order; failures are logged
pub fn remove_created_directories(created: &[PathBuf]) {
    for path in created.iter().rev() {
        match fs::remove_dir(path) {
            Ok(()) => debug!("Removed directory '{}'", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove directory '{}': {}", path.display(), e),
        }
    }
}

/// Where the configuration of `service` is installed
pub fn config_target(user: &ServiceUser, service: &str) -> PathBuf {
    user.home_dir
        .join(".config/divban")
        .join(format!("{}.toml", service))
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

/// Copy `source` into the service's config directory
///
/// An existing file is moved to `<file>.bak` first and restored if the
/// copy fails.
pub fn install_config(
    runner: &dyn CommandRunner,
    user: &ServiceUser,
    service: &str,
    source: &Path,
) -> Result<ConfigInstall> {
    let contents = fs::read(source).map_err(|e| Error::io(source, e))?;
    let target = config_target(user, service);

    let backup = if target.exists() {
        let backup = backup_path(&target);
        fs::rename(&target, &backup).map_err(|e| Error::io(&target, e))?;
        debug!("Kept previous config as {}", backup.display());
        Some(backup)
    } else {
        None
    };
    let install = ConfigInstall { target, backup };

    let written = atomic_write(&install.target, &contents, CONFIG_MODE)
        .and_then(|()| chown_path(runner, &install.target, user.uid, user.gid));
    if let Err(e) = written {
        if let Err(restore) = install.restore() {
            warn!("Failed to restore {}: {}", install.target.display(), restore);
        }
        return Err(e);
    }

    info!("Installed {}", install.target.display());
    Ok(install)
}

/// Build the provisioning steps for `ctx`
pub fn provision_steps<'a>(ctx: &'a ProvisionContext<'a>) -> Vec<SetupStep<'a, ProvisionState>> {
    let name = &ctx.service.name;
    let mut steps = Vec::new();

    if ctx.service.needs_privileged_ports {
        steps.push(SetupStep::new(
            "Allowing rootless services to bind ports 80 and up",
            move |_: &ProvisionState| {
                ensure_unprivileged_ports(ctx.runner, &ctx.paths()).map(ProvisionUpdate::Ports)
            },
        ));
    }

    steps.push(
        SetupStep::new(
            format!("Setting up service user for {}", name),
            move |_: &ProvisionState| {
                ctx.users()
                    .acquire_service_user(&ctx.service.name)
                    .map(ProvisionUpdate::User)
            },
        )
        .with_release(move |state: &ProvisionState, outcome| {
            if outcome.is_failure()
                && let Some(user) = &state.user
            {
                ctx.users()
                    .release_service_user(&ctx.service.name, user.was_created);
            }
            Ok(())
        }),
    );

    steps.push(
        SetupStep::new("Enabling linger", move |state: &ProvisionState| {
            let user = require_user(state, ctx.service)?;
            enable_linger(ctx.runner, &ctx.paths(), &user.username).map(ProvisionUpdate::Linger)
        })
        .with_release(move |state: &ProvisionState, outcome| {
            if outcome.is_failure()
                && let (Some(linger), Some(user)) = (&state.linger, state.service_user())
                && linger.was_created
            {
                disable_linger(ctx.runner, &ctx.paths(), &user.username)?;
            }
            Ok(())
        }),
    );

    steps.push(
        SetupStep::new("Creating directories", move |state: &ProvisionState| {
            let user = require_user(state, ctx.service)?;
            let dirs = service_directories(user, ctx.service);
            create_service_directories(ctx.runner, user, &dirs).map(ProvisionUpdate::Directories)
        })
        .with_release(move |state: &ProvisionState, outcome| {
            if outcome.is_failure() {
                remove_created_directories(&state.directories);
            }
            Ok(())
        }),
    );

    steps.push(
        SetupStep::new("Installing configuration", move |state: &ProvisionState| {
            let user = require_user(state, ctx.service)?;
            install_config(ctx.runner, user, &ctx.service.name, ctx.config_source)
                .map(ProvisionUpdate::Config)
        })
        .with_release(move |state: &ProvisionState, outcome| match &state.config {
            Some(config) if outcome == SagaOutcome::Failure => config.restore(),
            Some(config) => config.discard_backup(),
            None => Ok(()),
        }),
    );

    steps.push(SetupStep::new(
        format!("Running {} setup", name),
        move |state: &ProvisionState| {
            let user = require_user(state, ctx.service)?;
            let config_path = state
                .config
                .as_ref()
                .map(|config| config.target.clone())
                .unwrap_or_else(|| config_target(user, &ctx.service.name));
            ctx.service_setup
                .setup(&ServiceSetupContext {
                    service: ctx.service,
                    user,
                    config_path: &config_path,
                    runner: ctx.runner,
                })
                .map(|()| ProvisionUpdate::ServiceReady)
        },
    ));

    steps
}

/// Run the full provisioning saga for one service
pub fn provision_service(
    ctx: &ProvisionContext<'_>,
    progress: &dyn SetupProgress,
) -> Result<ProvisionState> {
    run_setup_saga(provision_steps(ctx), progress)
}
