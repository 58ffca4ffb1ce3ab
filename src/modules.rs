//! Module Host
//!
//! Holds externally registered commands keyed by the path they were loaded
//! from. The loading mechanics (dynamic libraries, embedding) are a
//! collaborator concern; the host only owns the registrations, answers
//! dispatcher lookups for names the built-in registry does not know, and
//! backs MODULE LIST / MODULE UNLOAD.

use crate::commands::registry::{HandlerFn, KeysFn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// A command registered by an external module. Unlike the built-in
/// descriptors these carry owned strings, since their names only exist at
/// registration time.
#[derive(Debug, Clone)]
pub struct ModuleCommandSpec {
    /// Canonical uppercase command name.
    pub name: String,
    /// The owning module's name (also its MODULE UNLOAD handle).
    pub module: String,
    pub categories: Vec<String>,
    /// Whether the on-write capacity check applies.
    pub grows_memory: bool,
    pub keys: KeysFn,
    pub handler: HandlerFn,
}

#[derive(Debug)]
struct LoadedModule {
    name: String,
    commands: Vec<Arc<ModuleCommandSpec>>,
}

/// Registry of loaded modules, keyed by path.
#[derive(Debug, Default)]
pub struct ModuleHost {
    modules: RwLock<HashMap<String, LoadedModule>>,
}

impl ModuleHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module's commands under its path. The module name is
    /// the path's file stem.
    pub fn register(&self, path: &str, commands: Vec<ModuleCommandSpec>) {
        let name = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let commands: Vec<Arc<ModuleCommandSpec>> = commands.into_iter().map(Arc::new).collect();
        info!(path, module = %name, commands = commands.len(), "module registered");
        self.modules
            .write()
            .unwrap()
            .insert(path.to_string(), LoadedModule { name, commands });
    }

    /// Unloads a module by name. Its commands stop resolving immediately.
    pub fn unload(&self, name: &str) -> bool {
        let mut modules = self.modules.write().unwrap();
        let before = modules.len();
        modules.retain(|_, module| module.name != name);
        let removed = modules.len() < before;
        if removed {
            info!(module = name, "module unloaded");
        }
        removed
    }

    /// Registered module paths.
    pub fn paths(&self) -> Vec<String> {
        self.modules.read().unwrap().keys().cloned().collect()
    }

    /// Resolves an uppercase command name to a module registration.
    pub fn lookup(&self, name: &str) -> Option<Arc<ModuleCommandSpec>> {
        let modules = self.modules.read().unwrap();
        modules
            .values()
            .flat_map(|m| m.commands.iter())
            .find(|c| c.name == name)
            .cloned()
    }

    /// Every registered module command.
    pub fn all(&self) -> Vec<Arc<ModuleCommandSpec>> {
        let modules = self.modules.read().unwrap();
        modules
            .values()
            .flat_map(|m| m.commands.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::registry::no_keys;
    use crate::commands::{CommandError, Reply, Session};
    use crate::protocol::RespValue;
    use crate::server::Server;
    use bytes::Bytes;

    fn hello_handler(
        _server: &Server,
        _session: &mut Session,
        _argv: &[Bytes],
    ) -> Result<Reply, CommandError> {
        Reply::value(RespValue::simple_string("HELLO"))
    }

    fn spec(name: &str) -> ModuleCommandSpec {
        ModuleCommandSpec {
            name: name.to_string(),
            module: "demo".to_string(),
            categories: vec!["fast".to_string()],
            grows_memory: false,
            keys: no_keys,
            handler: hello_handler,
        }
    }

    #[test]
    fn test_register_lookup_unload() {
        let host = ModuleHost::new();
        host.register("/opt/modules/demo.so", vec![spec("DEMO.HELLO")]);

        assert_eq!(host.paths(), vec!["/opt/modules/demo.so".to_string()]);
        assert!(host.lookup("DEMO.HELLO").is_some());
        assert!(host.lookup("NOPE").is_none());

        assert!(host.unload("demo"));
        assert!(!host.unload("demo"));
        assert!(host.lookup("DEMO.HELLO").is_none());
        assert!(host.paths().is_empty());
    }

    #[test]
    fn test_module_command_dispatches() {
        let server = Server::for_tests();
        server
            .modules()
            .register("/opt/modules/demo.so", vec![spec("DEMO.HELLO")]);

        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let mut session = Session::new(1, tx);
        let reply =
            crate::commands::dispatch(&server, &mut session, &[Bytes::from("DEMO.HELLO")]);
        let mut buf = Vec::new();
        reply.serialize_into(&mut buf);
        assert_eq!(buf, b"+HELLO\r\n");
    }
}
