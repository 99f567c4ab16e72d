use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::core::{Dynamic, Properties};
use crate::error::RegistryError;

/// Computes the output of a node from its properties and the outputs of its
/// predecessors.
///
/// Closures are registered directly through [`Registry::register`]; implement
/// this trait for executors that carry their own state.
pub trait Executor: Send + Sync {
    fn execute(&self, properties: &Properties, inputs: Inputs<'_>) -> anyhow::Result<Dynamic>;
}

struct FnExecutor<F, R> {
    callback: F,
    _phantom: PhantomData<fn() -> R>,
}

impl<F, R> Executor for FnExecutor<F, R>
where
    F: Fn(&Properties, Inputs<'_>) -> anyhow::Result<R> + Send + Sync,
    R: Send + Sync + 'static,
{
    fn execute(&self, properties: &Properties, inputs: Inputs<'_>) -> anyhow::Result<Dynamic> {
        let output = (self.callback)(properties, inputs)?;
        Ok(Arc::new(output))
    }
}

/// Outputs of a node's predecessors, in the order of its inputs.
#[derive(Clone, Copy)]
pub struct Inputs<'a> {
    values: &'a [Dynamic],
}

impl<'a> Inputs<'a> {
    pub fn new(values: &'a [Dynamic]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Downcasts the input at `index` to the type its producer returned.
    pub fn get<T: 'static>(&self, index: usize) -> anyhow::Result<&'a T> {
        let value = self.raw(index).ok_or_else(|| {
            anyhow!(
                "input {index} is not connected, the node has {} inputs",
                self.values.len()
            )
        })?;

        value
            .downcast_ref::<T>()
            .ok_or_else(|| anyhow!("input {index} is not of type {}", type_name::<T>()))
    }

    /// The type-erased input at `index`.
    pub fn raw(&self, index: usize) -> Option<&'a Dynamic> {
        self.values.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Dynamic> + use<'a> {
        self.values.iter()
    }
}

impl fmt::Debug for Inputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inputs")
            .field("len", &self.values.len())
            .finish()
    }
}

/// Descriptive data the editor shows for a node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorMetadata {
    pub description: String,
    /// Expected number of inputs, 0 for source nodes.
    pub inputs: usize,
    /// Expected number of outputs.
    pub outputs: usize,
    pub tags: Vec<String>,
}

impl Default for ExecutorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            inputs: 0,
            outputs: 1,
            tags: Vec::new(),
        }
    }
}

impl ExecutorMetadata {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn inputs(mut self, count: usize) -> Self {
        self.inputs = count;
        self
    }

    pub fn outputs(mut self, count: usize) -> Self {
        self.outputs = count;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Case-insensitive tag check.
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim();
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Clone)]
struct Entry {
    executor: Arc<dyn Executor>,
    metadata: ExecutorMetadata,
}

/// Lookup table from node type to executor.
///
/// The registry is an ordinary value: the caller builds one, fills it and
/// hands it to the engine by reference. It must not be modified while a plan
/// is running.
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure as the executor of `node_type`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use nodeflow::{ExecutorMetadata, Registry};
    ///
    /// let mut registry = Registry::new();
    /// registry
    ///     .register(
    ///         "Constant",
    ///         |props, _| Ok(props.get_as::<i64>("value").unwrap_or_default()),
    ///         ExecutorMetadata::new("Emits a number").tag("source"),
    ///     )
    ///     .unwrap();
    ///
    /// assert!(registry.contains("Constant"));
    /// ```
    pub fn register<F, R>(
        &mut self,
        node_type: &str,
        executor: F,
        metadata: ExecutorMetadata,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&Properties, Inputs<'_>) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        let executor = FnExecutor {
            callback: executor,
            _phantom: PhantomData,
        };

        self.register_executor(node_type, Arc::new(executor), metadata)
    }

    /// Registers a trait object as the executor of `node_type`.
    ///
    /// Fails if the type is empty or already taken; replacing an executor
    /// requires an explicit [`unregister`](Self::unregister) first.
    pub fn register_executor(
        &mut self,
        node_type: &str,
        executor: Arc<dyn Executor>,
        metadata: ExecutorMetadata,
    ) -> Result<(), RegistryError> {
        let node_type = node_type.trim();

        if node_type.is_empty() {
            return Err(RegistryError::EmptyType);
        }

        if self.entries.contains_key(node_type) {
            return Err(RegistryError::AlreadyRegistered(node_type.to_owned()));
        }

        self.entries
            .insert(node_type.to_owned(), Entry { executor, metadata });

        tracing::debug!("registered executor for node type: {node_type}");
        Ok(())
    }

    /// Removes the executor of `node_type`, returning whether there was one.
    pub fn unregister(&mut self, node_type: &str) -> bool {
        let node_type = node_type.trim();
        let removed = self.entries.remove(node_type).is_some();

        if removed {
            tracing::debug!("unregistered executor for node type: {node_type}");
        }

        removed
    }

    /// Looks up the executor of `node_type`.
    pub fn get(&self, node_type: &str) -> Result<&dyn Executor, RegistryError> {
        let node_type = node_type.trim();

        match self.entries.get(node_type) {
            Some(entry) => Ok(entry.executor.as_ref()),
            None => Err(RegistryError::NotFound {
                node_type: node_type.to_owned(),
                available: self.types().into_iter().map(str::to_owned).collect(),
            }),
        }
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type.trim())
    }

    /// Looks up and runs the executor of `node_type`.
    pub fn execute(
        &self,
        node_type: &str,
        properties: &Properties,
        inputs: Inputs<'_>,
    ) -> anyhow::Result<Dynamic> {
        self.get(node_type)?.execute(properties, inputs)
    }

    /// All registered node types, sorted.
    pub fn types(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metadata(&self, node_type: &str) -> Option<&ExecutorMetadata> {
        self.entries
            .get(node_type.trim())
            .map(|entry| &entry.metadata)
    }

    pub fn all_metadata(&self) -> BTreeMap<&str, &ExecutorMetadata> {
        self.entries
            .iter()
            .map(|(node_type, entry)| (node_type.as_str(), &entry.metadata))
            .collect()
    }

    /// Node types carrying `tag`, compared case-insensitively, sorted.
    pub fn filter_by_tag(&self, tag: &str) -> Vec<&str> {
        self.by_category(tag).into_keys().collect()
    }

    /// Node types of a category such as `input`, `processing` or `output`,
    /// with their metadata. Categories are expressed as tags.
    pub fn by_category(&self, category: &str) -> BTreeMap<&str, &ExecutorMetadata> {
        self.all_metadata()
            .into_iter()
            .filter(|(_, metadata)| metadata.has_tag(category))
            .collect()
    }

    /// Drops every registered executor.
    pub fn clear(&mut self) {
        self.entries.clear();
        tracing::warn!("node executor registry cleared");
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.types())
            .finish()
    }
}
