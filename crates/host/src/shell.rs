use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use uuid::Uuid;

/// Container id the root component mounts into.
pub const APP_CONTAINER_ID: &str = "app";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("mount container '{0}' not found in the shell")]
    MissingContainer(String),
    #[error("container '{0}' already has a mounted root")]
    AlreadyMounted(String),
    #[error("root component '{0}' failed to mount: {1}")]
    ComponentInit(String, String),
}

#[derive(Debug, Clone)]
pub struct MountPoint {
    container: String,
    instance: Uuid,
}

impl MountPoint {
    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }
}

pub trait RootComponent: Send {
    fn name(&self) -> &str;
    fn on_mount(&mut self, target: &MountPoint) -> Result<(), String>;
}

/// Registry of mount containers the hosting document provides. Mounting is
/// checked and happens at most once per container.
#[derive(Default)]
pub struct AppShell {
    containers: BTreeSet<String>,
    occupied: BTreeMap<String, Uuid>,
}

impl AppShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_container() -> Self {
        let mut shell = Self::new();
        shell.register_container(APP_CONTAINER_ID);
        shell
    }

    pub fn register_container(&mut self, id: impl Into<String>) {
        self.containers.insert(id.into());
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.containers.contains(id)
    }

    pub fn mount(
        &mut self,
        container: &str,
        mut component: Box<dyn RootComponent>,
    ) -> Result<MountedApp, StartupError> {
        if !self.containers.contains(container) {
            return Err(StartupError::MissingContainer(container.to_owned()));
        }
        if self.occupied.contains_key(container) {
            return Err(StartupError::AlreadyMounted(container.to_owned()));
        }

        let target = MountPoint {
            container: container.to_owned(),
            instance: Uuid::new_v4(),
        };
        component.on_mount(&target).map_err(|err| {
            StartupError::ComponentInit(component.name().to_owned(), err)
        })?;

        self.occupied.insert(container.to_owned(), target.instance);
        Ok(MountedApp { target, component })
    }
}

/// Handle to the mounted root; the module's externally visible value.
pub struct MountedApp {
    target: MountPoint,
    component: Box<dyn RootComponent>,
}

impl MountedApp {
    pub fn instance(&self) -> Uuid {
        self.target.instance
    }

    pub fn container(&self) -> &str {
        self.target.container()
    }

    pub fn component(&self) -> &dyn RootComponent {
        self.component.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestRoot {
        fail: bool,
    }

    impl TestRoot {
        fn new(fail: bool) -> Box<Self> {
            Box::new(Self { fail })
        }
    }

    impl RootComponent for TestRoot {
        fn name(&self) -> &str {
            "test-root"
        }

        fn on_mount(&mut self, target: &MountPoint) -> Result<(), String> {
            if self.fail {
                return Err("render backend missing".to_owned());
            }
            assert_eq!(target.container(), APP_CONTAINER_ID);
            Ok(())
        }
    }

    #[test]
    fn mounts_into_a_registered_container() {
        let mut shell = AppShell::with_app_container();
        let app = shell
            .mount(APP_CONTAINER_ID, TestRoot::new(false))
            .expect("mount");
        assert_eq!(app.container(), APP_CONTAINER_ID);
        assert!(!app.instance().is_nil());
    }

    #[test]
    fn missing_container_is_a_typed_startup_error() {
        let mut shell = AppShell::new();
        let err = shell
            .mount(APP_CONTAINER_ID, TestRoot::new(false))
            .expect_err("mount must fail");
        assert!(matches!(err, StartupError::MissingContainer(_)));
    }

    #[test]
    fn second_mount_into_the_same_container_fails() {
        let mut shell = AppShell::with_app_container();
        shell
            .mount(APP_CONTAINER_ID, TestRoot::new(false))
            .expect("first mount");
        let err = shell
            .mount(APP_CONTAINER_ID, TestRoot::new(false))
            .expect_err("second mount must fail");
        assert!(matches!(err, StartupError::AlreadyMounted(_)));
    }

    #[test]
    fn failed_component_init_leaves_the_container_free() {
        let mut shell = AppShell::with_app_container();
        let err = shell
            .mount(APP_CONTAINER_ID, TestRoot::new(true))
            .expect_err("mount must fail");
        assert!(matches!(err, StartupError::ComponentInit(_, _)));
        shell
            .mount(APP_CONTAINER_ID, TestRoot::new(false))
            .expect("mount after failed init");
    }
}
