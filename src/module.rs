use log::{debug, warn};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::{
    ast::{Block, ModulePath, StmtType},
    error::{runtime_error, Result, RuntimeError},
    parser::parse,
    runtime::Runtime,
    stdlib::LibraryTable,
    tokenizer::tokenize,
    value::Value,
};

pub const EXTENSION: &str = ".myco";

/// What a `use` alias refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Module {
    Source { path: PathBuf, program: Block },
    Library(&'static str),
}

#[derive(Debug, Default)]
pub struct ModuleTable {
    modules: HashMap<String, Module>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, alias: &str) -> Option<&Module> {
        self.modules.get(alias)
    }

    /// Replaces any earlier module bound to `alias`.
    pub fn insert(&mut self, alias: &str, module: Module) {
        self.modules.insert(alias.to_string(), module);
    }

    pub fn library(&self, alias: &str) -> Option<&'static str> {
        match self.modules.get(alias)? {
            Module::Library(name) => Some(*name),
            Module::Source { .. } => None,
        }
    }
}

/// `./lib/util` under `base` becomes `base/lib/util.myco`.
pub fn resolve_module_path(base_dir: &Path, raw: &str) -> PathBuf {
    let relative = raw.strip_prefix("./").unwrap_or(raw);
    if relative.ends_with(EXTENSION) {
        base_dir.join(relative)
    } else {
        base_dir.join(format!("{}{}", relative, EXTENSION))
    }
}

fn load_program(path: &Path) -> Result<Block> {
    let source = fs::read(path)?;
    let tokens = tokenize(&source)?;
    let program = parse(&tokens)?;
    debug!(
        "parsed module {} ({} statements)",
        path.display(),
        program.len()
    );
    Ok(program)
}

impl Runtime {
    pub(crate) fn use_module(&mut self, path: &ModulePath, alias: &str, line: usize) -> Result<()> {
        if let ModulePath::Name(name) | ModulePath::String(name) = path {
            if let Some(library) = LibraryTable::library_name(name) {
                debug!("alias '{}' bound to library '{}'", alias, library);
                self.modules.insert(alias, Module::Library(library));
                return Ok(());
            }
        }

        let resolved = resolve_module_path(&self.base_dir, path.text());
        if self.loading.contains(&resolved) {
            warn!("skipping cyclic use of {}", resolved.display());
            return Ok(());
        }

        let program = match load_program(&resolved) {
            Ok(program) => program,
            Err(err) => {
                warn!("could not load module {}: {}", resolved.display(), err);
                return self.report(&format!("Cannot load module '{}': {}", path.text(), err), line);
            }
        };

        self.loading.push(resolved.clone());
        let installed = self.install_module(&resolved, &program, alias);
        self.loading.pop();
        installed?;

        debug!("alias '{}' bound to {}", alias, resolved.display());
        self.modules.insert(
            alias,
            Module::Source {
                path: resolved,
                program,
            },
        );
        Ok(())
    }

    fn install_module(&mut self, path: &Path, program: &Block, alias: &str) -> Result<()> {
        let module_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let caller_dir = std::mem::replace(&mut self.base_dir, module_dir);
        let imported = self.import_nested(program);
        self.base_dir = caller_dir;
        imported?;

        for stmt in program {
            match &stmt.stmt_type {
                StmtType::Function(function) => {
                    let function = Rc::new(function.clone());
                    self.functions
                        .insert(format!("{}.{}", alias, function.name), Rc::clone(&function));
                    self.functions.insert(function.name.clone(), function);
                }
                StmtType::Use { .. } | StmtType::Let { .. } => {}
                _ => debug!(
                    "ignoring statement at line {} of module '{}'",
                    stmt.line, alias
                ),
            }
        }

        // Constants see the ones declared before them by their bare names.
        self.env.push_scope();
        let constants = self.evaluate_constants(program);
        if !self.env.pop_scope() {
            return runtime_error(RuntimeError::BadMemory {
                message: "scope stack underflow while loading a module".to_string(),
                line: 0,
            });
        }

        for (name, value) in constants? {
            self.env.assign(&format!("{}.{}", alias, name), value);
        }
        Ok(())
    }

    fn import_nested(&mut self, program: &Block) -> Result<()> {
        for stmt in program {
            if let StmtType::Use { path, alias } = &stmt.stmt_type {
                self.use_module(path, alias, stmt.line)?;
            }
        }
        Ok(())
    }

    fn evaluate_constants(&mut self, program: &Block) -> Result<Vec<(String, Value)>> {
        let mut constants = Vec::new();
        for stmt in program {
            if let StmtType::Let {
                name, initializer, ..
            } = &stmt.stmt_type
            {
                let value = self.evaluate(initializer)?;
                self.env.define(name, value.clone());
                constants.push((name.clone(), value));
            }
        }
        Ok(constants)
    }
}
