//! Minimal evaluation graph for the one provider an import needs.
//!
//! Nodes are variables (root variables fed by the layered [`VariableSources`],
//! child-module variables fed by their module call's arguments) plus a single
//! provider-configuration node that joins on every variable it references.
//! Nodes are evaluated level by level in topological order; the nodes of one
//! level run as concurrent tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;

use crate::address::{ModulePath, ResourceAddress};
use crate::config::Module;
use crate::error::{ImportError, Result};
use crate::expr;
use crate::providers::{Provider, ProviderConfig, ProviderRef, ProviderRegistry};
use crate::variables::VariableSources;

/// A variable as seen from one module scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarKey {
    pub scope: ModulePath,
    pub name: String,
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_root() {
            write!(f, "var.{}", self.name)
        } else {
            write!(f, "{}.var.{}", self.scope, self.name)
        }
    }
}

#[derive(Debug, Clone)]
enum NodeInput {
    /// Root variable: caller-supplied layers, then the declared default.
    Root { default: Option<Value> },
    /// Child variable set by the module call, evaluated in the caller's scope.
    Argument { expr: Value, scope: ModulePath },
    Default(Value),
}

#[derive(Debug, Clone)]
struct VarNode {
    key: VarKey,
    input: NodeInput,
    deps: BTreeSet<VarKey>,
}

#[derive(Debug, Clone)]
struct ProviderNode {
    reference: ProviderRef,
    scope: ModulePath,
    attributes: BTreeMap<String, Value>,
    deps: BTreeSet<VarKey>,
}

#[derive(Debug, Clone)]
pub struct EvaluationGraph {
    nodes: BTreeMap<VarKey, VarNode>,
    provider: ProviderNode,
}

impl EvaluationGraph {
    pub fn variables(&self) -> impl Iterator<Item = &VarKey> {
        self.nodes.keys()
    }

    pub fn provider_dependencies(&self) -> impl Iterator<Item = &VarKey> {
        self.provider.deps.iter()
    }

    /// Groups variable nodes so that every node's dependencies sit in an
    /// earlier group.
    pub fn levels(&self) -> Result<Vec<Vec<VarKey>>> {
        let mut remaining: BTreeMap<&VarKey, BTreeSet<&VarKey>> = self
            .nodes
            .values()
            .map(|node| (&node.key, node.deps.iter().collect()))
            .collect();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<VarKey> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(key, _)| (*key).clone())
                .collect();
            if ready.is_empty() {
                // Unreachable for graphs built by `graph()`, where every
                // dependency sits in a shallower scope.
                let stuck: Vec<String> = remaining.keys().map(|k| k.to_string()).collect();
                return Err(ImportError::InvalidConfiguration(format!(
                    "cycle between variables: {}",
                    stuck.join(", ")
                )));
            }
            for key in &ready {
                remaining.remove(key);
            }
            for deps in remaining.values_mut() {
                deps.retain(|dep| !ready.contains(*dep));
            }
            levels.push(ready);
        }
        Ok(levels)
    }
}

/// A provider handle that has accepted its configuration.
#[derive(Clone)]
pub struct ConfiguredProvider {
    /// The reference the imported resource is linked to in state.
    pub reference: ProviderRef,
    /// Module whose provider block supplied the configuration.
    pub scope: ModulePath,
    pub config: ProviderConfig,
    pub handle: Arc<dyn Provider>,
}

impl fmt::Debug for ConfiguredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredProvider")
            .field("reference", &self.reference)
            .field("scope", &self.scope)
            .field("provider", &self.handle.name())
            .finish()
    }
}

pub struct ProviderConfigEvaluator<'a> {
    config: &'a Module,
    registry: &'a ProviderRegistry,
}

fn scoped_deps(scope: &ModulePath, value: &Value) -> BTreeSet<VarKey> {
    expr::references(value)
        .into_iter()
        .map(|name| VarKey {
            scope: scope.clone(),
            name,
        })
        .collect()
}

fn unresolved(key: &VarKey, detail: impl Into<String>) -> ImportError {
    ImportError::UnresolvedVariable {
        variable: key.to_string(),
        detail: detail.into(),
    }
}

fn evaluate_node(
    node: VarNode,
    sources: &VariableSources,
    resolved: &BTreeMap<VarKey, Value>,
) -> Result<(VarKey, Value)> {
    let value = match node.input {
        NodeInput::Root { default } => {
            let (value, source) = sources
                .resolve(&node.key.name, default.as_ref())
                .ok_or_else(|| {
                    unresolved(
                        &node.key,
                        "no value given with -var, a var-file, or the environment, and no default is declared",
                    )
                })?;
            tracing::debug!(variable = %node.key, source = %source, "variable resolved");
            value
        }
        NodeInput::Argument { expr: argument, scope } => {
            let lookup = |name: &str| {
                resolved
                    .get(&VarKey {
                        scope: scope.clone(),
                        name: name.to_string(),
                    })
                    .cloned()
            };
            let value = expr::interpolate(&argument, &lookup).map_err(|missing| {
                unresolved(
                    &node.key,
                    format!("module argument references unresolved variable {:?}", missing),
                )
            })?;
            tracing::debug!(variable = %node.key, "variable resolved from module argument");
            value
        }
        NodeInput::Default(value) => {
            tracing::debug!(variable = %node.key, "variable resolved from default");
            value
        }
    };
    Ok((node.key, value))
}

impl<'a> ProviderConfigEvaluator<'a> {
    pub fn new(config: &'a Module, registry: &'a ProviderRegistry) -> Self {
        Self { config, registry }
    }

    /// Provider for `address`: the override, else the resource block's own
    /// `provider` attribute, else the provider implied by the resource type.
    pub fn provider_ref(
        &self,
        address: &ResourceAddress,
        override_ref: Option<&ProviderRef>,
    ) -> Result<ProviderRef> {
        if let Some(reference) = override_ref {
            return Ok(reference.clone());
        }
        let declared = self
            .config
            .managed_resource(&address.module, &address.resource_type, &address.name)
            .and_then(|block| block.provider.as_deref());
        match declared {
            Some(text) => text.parse::<ProviderRef>().map_err(|e| ImportError::UnknownProvider {
                provider: text.to_string(),
                detail: format!("{} (declared on {})", e, address),
            }),
            None => ProviderRef::implied_by(&address.resource_type).ok_or_else(|| {
                ImportError::UnknownProvider {
                    provider: address.resource_type.clone(),
                    detail: format!(
                        "no provider can be inferred from resource type {:?}; pass --provider or set provider on the resource block",
                        address.resource_type
                    ),
                }
            }),
        }
    }

    /// Walks from the resource's module toward the root looking for the
    /// provider block, following module-call provider mappings on the way.
    fn find_provider_block(
        &self,
        module: &ModulePath,
        reference: &ProviderRef,
    ) -> Result<(ProviderRef, ModulePath, BTreeMap<String, Value>)> {
        let mut current = reference.clone();
        let mut path = module.clone();

        loop {
            if let Some(block) = self
                .config
                .descendant(&path)
                .and_then(|m| m.provider_block(&current.provider_type, current.alias.as_deref()))
            {
                return Ok((current, path, block.config.clone()));
            }

            let Some(parent) = path.parent() else { break };
            if let Some(mapped) = self
                .config
                .module_call(&path)
                .and_then(|call| call.providers.get(&current.to_string()))
            {
                current = mapped.parse::<ProviderRef>().map_err(|e| ImportError::UnknownProvider {
                    provider: mapped.clone(),
                    detail: format!("{} (passed to {})", e, path),
                })?;
            }
            path = parent;
        }

        if current.alias.is_some() {
            return Err(ImportError::UnknownProvider {
                provider: current.to_string(),
                detail: "no provider block with this alias is declared in the configuration"
                    .to_string(),
            });
        }
        tracing::debug!(provider = %current, "no provider block, using implicit empty configuration");
        Ok((current, ModulePath::root(), BTreeMap::new()))
    }

    /// Builds the graph reachable from the provider configuration block.
    pub fn graph(&self, address: &ResourceAddress, reference: &ProviderRef) -> Result<EvaluationGraph> {
        let (block_ref, scope, attributes) = self.find_provider_block(&address.module, reference)?;
        let provider_deps = scoped_deps(&scope, &Value::Object(attributes.clone().into_iter().collect()));

        let mut nodes: BTreeMap<VarKey, VarNode> = BTreeMap::new();
        let mut worklist: Vec<VarKey> = provider_deps.iter().cloned().collect();

        while let Some(key) = worklist.pop() {
            if nodes.contains_key(&key) {
                continue;
            }
            let decl = self
                .config
                .descendant(&key.scope)
                .and_then(|m| m.variables.get(&key.name))
                .ok_or_else(|| unresolved(&key, "referenced but not declared"))?;

            let (input, deps) = match key.scope.parent() {
                None => (
                    NodeInput::Root {
                        default: decl.default.clone(),
                    },
                    BTreeSet::new(),
                ),
                Some(parent) => {
                    let argument = self
                        .config
                        .module_call(&key.scope)
                        .and_then(|call| call.arguments.get(&key.name));
                    match (argument, &decl.default) {
                        (Some(expr), _) => (
                            NodeInput::Argument {
                                expr: expr.clone(),
                                scope: parent.clone(),
                            },
                            scoped_deps(&parent, expr),
                        ),
                        (None, Some(default)) => (NodeInput::Default(default.clone()), BTreeSet::new()),
                        (None, None) => {
                            return Err(unresolved(
                                &key,
                                format!(
                                    "{} does not pass a value and no default is declared",
                                    key.scope
                                ),
                            ));
                        }
                    }
                }
            };

            worklist.extend(deps.iter().cloned());
            nodes.insert(
                key.clone(),
                VarNode {
                    key,
                    input,
                    deps,
                },
            );
        }

        Ok(EvaluationGraph {
            nodes,
            provider: ProviderNode {
                reference: block_ref,
                scope,
                attributes,
                deps: provider_deps,
            },
        })
    }

    /// Resolves, instantiates, and configures the provider for `address`.
    /// `configure` is called exactly once, after every variable resolved.
    pub async fn evaluate(
        &self,
        address: &ResourceAddress,
        override_ref: Option<&ProviderRef>,
        sources: &VariableSources,
    ) -> Result<ConfiguredProvider> {
        let reference = self.provider_ref(address, override_ref)?;
        let graph = self.graph(address, &reference)?;
        let levels = graph.levels()?;
        tracing::debug!(
            provider = %reference,
            variables = graph.nodes.len(),
            levels = levels.len(),
            "evaluating provider configuration"
        );

        let sources = Arc::new(sources.clone());
        let mut resolved: BTreeMap<VarKey, Value> = BTreeMap::new();

        for level in levels {
            let snapshot = Arc::new(resolved.clone());
            // Dropping the set on an early return aborts the rest of the level.
            let mut tasks = JoinSet::new();
            for key in level {
                let Some(node) = graph.nodes.get(&key).cloned() else {
                    continue;
                };
                let sources = Arc::clone(&sources);
                let snapshot = Arc::clone(&snapshot);
                tasks.spawn(async move { evaluate_node(node, &sources, &snapshot) });
            }
            while let Some(joined) = tasks.join_next().await {
                let (key, value) = joined.map_err(|e| {
                    ImportError::InvalidConfiguration(format!("variable evaluation task failed: {}", e))
                })??;
                resolved.insert(key, value);
            }
        }

        let provider = &graph.provider;
        let lookup = |name: &str| {
            resolved
                .get(&VarKey {
                    scope: provider.scope.clone(),
                    name: name.to_string(),
                })
                .cloned()
        };
        let mut attributes = BTreeMap::new();
        for (name, value) in &provider.attributes {
            let value = expr::interpolate(value, &lookup).map_err(|missing| {
                unresolved(
                    &VarKey {
                        scope: provider.scope.clone(),
                        name: missing,
                    },
                    format!("referenced by provider {} attribute {:?}", provider.reference, name),
                )
            })?;
            attributes.insert(name.clone(), value);
        }
        let config = ProviderConfig {
            provider: provider.reference.clone(),
            attributes,
        };

        let handle = self
            .registry
            .get(&reference)
            .map_err(|e| ImportError::UnknownProvider {
                provider: reference.to_string(),
                detail: e.to_string(),
            })?;
        handle
            .configure(&config)
            .await
            .map_err(|source| ImportError::ProviderConfigureError {
                provider: reference.to_string(),
                source,
            })?;
        tracing::info!(provider = %reference, "provider configured");

        Ok(ConfiguredProvider {
            reference,
            scope: provider.scope.clone(),
            config,
            handle,
        })
    }
}
