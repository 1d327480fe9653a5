//! Deployment engine abstraction.
//!
//! Provisioning never calls a cloud API. It describes resources and the
//! edges between them through an [`Engine`]; the engine owns diffing,
//! applying, retries, locking and state. Output values are references until
//! the engine applies the graph, so ordering is carried by data dependencies
//! rather than control flow.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

mod plan;

pub use plan::{Plan, PlanEngine, PlanError, PlannedResource};

/// Resource kinds declared by the provisioning unit.
pub mod kinds {
    /// Compute instance.
    pub const INSTANCE: &str = "aws:ec2/instance";
    /// Standalone network interface.
    pub const NETWORK_INTERFACE: &str = "aws:ec2/networkInterface";
    /// Elastic (static) public address.
    pub const ELASTIC_IP: &str = "aws:ec2/eip";
    /// Association of an elastic address with an instance.
    pub const ELASTIC_IP_ASSOCIATION: &str = "aws:ec2/eipAssociation";
    /// Route 53 record set.
    pub const DNS_RECORD: &str = "aws:route53/record";
    /// Existing VPC subnet.
    pub const SUBNET: &str = "aws:ec2/subnet";
    /// Block storage volume.
    pub const VOLUME: &str = "aws:ebs/volume";
    /// Attachment of a volume to an instance.
    pub const VOLUME_ATTACHMENT: &str = "aws:ec2/volumeAttachment";
    /// Metric alarm.
    pub const METRIC_ALARM: &str = "aws:cloudwatch/metricAlarm";
}

/// Future returned by engine operations.
pub type EngineFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Stable identity of a resource within one provisioning pass.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ResourceRef {
    kind: String,
    name: String,
}

impl ResourceRef {
    /// Creates a reference from a resource kind and logical name.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Resource kind, for example `aws:ec2/instance`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Logical resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a reference to one of this resource's outputs.
    #[must_use]
    pub fn output(&self, key: impl Into<String>) -> OutputRef {
        OutputRef {
            resource: self.clone(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.kind, self.name)
    }
}

/// Reference to a named output of a resource.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct OutputRef {
    /// Resource producing the output.
    pub resource: ResourceRef,
    /// Output key, for example `public_ip`.
    pub key: String,
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.key)
    }
}

/// Input property of a declared resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Property {
    /// Value known while the graph is built.
    Literal(serde_json::Value),
    /// Value produced by another resource once applied.
    Output(OutputRef),
    /// List mixing literals and outputs.
    List(Vec<Property>),
    /// Nested block mixing literals and outputs.
    Map(BTreeMap<String, Property>),
}

impl Property {
    fn collect_resources(&self, into: &mut BTreeSet<ResourceRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Output(output) => {
                into.insert(output.resource.clone());
            }
            Self::List(items) => {
                for item in items {
                    item.collect_resources(into);
                }
            }
            Self::Map(entries) => {
                for entry in entries.values() {
                    entry.collect_resources(into);
                }
            }
        }
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Self::Literal(serde_json::Value::from(value))
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Self::Literal(serde_json::Value::from(value))
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Self::Literal(serde_json::Value::from(value))
    }
}

impl From<u32> for Property {
    fn from(value: u32) -> Self {
        Self::Literal(serde_json::Value::from(value))
    }
}

impl From<OutputRef> for Property {
    fn from(value: OutputRef) -> Self {
        Self::Output(value)
    }
}

impl From<&Output> for Property {
    fn from(value: &Output) -> Self {
        match &value.value {
            OutputValue::Known(known) => Self::from(known.as_str()),
            OutputValue::Ref(reference) => Self::Output(reference.clone()),
        }
    }
}

impl From<BTreeMap<String, Property>> for Property {
    fn from(value: BTreeMap<String, Property>) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<Property>> From<Vec<T>> for Property {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

/// Value carried by an [`Output`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputValue {
    /// Value already known while the graph is built.
    Known(String),
    /// Value produced by a resource when the engine applies it.
    Ref(OutputRef),
}

/// Value exposed to downstream consumers together with the resources that
/// must be applied before it is valid.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Output {
    value: OutputValue,
    after: BTreeSet<ResourceRef>,
}

impl Output {
    /// Wraps a value that is known immediately.
    #[must_use]
    pub fn known(value: impl Into<String>) -> Self {
        Self {
            value: OutputValue::Known(value.into()),
            after: BTreeSet::new(),
        }
    }

    /// Wraps a resource output; it resolves once that resource exists.
    #[must_use]
    pub fn reference(reference: OutputRef) -> Self {
        let after = BTreeSet::from([reference.resource.clone()]);
        Self {
            value: OutputValue::Ref(reference),
            after,
        }
    }

    /// Adds a resource that must be applied before this output resolves.
    #[must_use]
    pub fn after(mut self, resource: &ResourceRef) -> Self {
        self.after.insert(resource.clone());
        self
    }

    /// The carried value.
    #[must_use]
    pub const fn value(&self) -> &OutputValue {
        &self.value
    }

    /// Resources this output waits on.
    #[must_use]
    pub const fn waits_on(&self) -> &BTreeSet<ResourceRef> {
        &self.after
    }

    /// Returns the value when it is already known.
    #[must_use]
    pub fn as_known(&self) -> Option<&str> {
        match &self.value {
            OutputValue::Known(value) => Some(value),
            OutputValue::Ref(_) => None,
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            OutputValue::Known(value) => f.write_str(value),
            OutputValue::Ref(reference) => write!(f, "{reference}"),
        }
    }
}

/// Description of a resource handed to an [`Engine`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceDecl {
    kind: String,
    name: String,
    properties: BTreeMap<String, Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<ResourceRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    replace_on_changes: Vec<String>,
}

impl ResourceDecl {
    /// Starts a declaration with no properties.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
            replace_on_changes: Vec::new(),
        }
    }

    /// Sets an input property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Property>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets an input property when a value is present.
    #[must_use]
    pub fn optional_property<V: Into<Property>>(
        self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> Self {
        if let Some(inner) = value {
            return self.property(key, inner);
        }
        self
    }

    /// Adds an explicit ordering edge that is not carried by a property.
    #[must_use]
    pub fn depends_on(mut self, resource: &ResourceRef) -> Self {
        if !self.depends_on.contains(resource) {
            self.depends_on.push(resource.clone());
        }
        self
    }

    /// Marks a property whose change forces the engine to replace the
    /// resource instead of updating it in place.
    #[must_use]
    pub fn replace_on_changes(mut self, key: impl Into<String>) -> Self {
        self.replace_on_changes.push(key.into());
        self
    }

    /// Identity of the declared resource.
    #[must_use]
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.kind, &self.name)
    }

    /// Looks up an input property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }

    /// Properties forcing replacement when changed.
    #[must_use]
    pub fn replacement_triggers(&self) -> &[String] {
        &self.replace_on_changes
    }

    /// Every resource this declaration depends on, explicitly or through an
    /// output reference.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceRef> {
        let mut resources: BTreeSet<ResourceRef> = self.depends_on.iter().cloned().collect();
        for property in self.properties.values() {
            property.collect_resources(&mut resources);
        }
        resources
    }
}

/// Narrow interface implemented by deployment engines.
pub trait Engine {
    /// Engine specific error type. Provisioning propagates it unchanged.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Declares a resource and returns its reference.
    fn declare_resource(&self, decl: ResourceDecl) -> EngineFuture<'_, ResourceRef, Self::Error>;

    /// Declares that `dependent` must be applied after `dependency`.
    fn declare_dependency<'a>(
        &'a self,
        dependent: &'a ResourceRef,
        dependency: &'a ResourceRef,
    ) -> EngineFuture<'a, (), Self::Error>;

    /// Reads an output of a declared or pre-existing resource.
    fn read_output<'a>(
        &'a self,
        resource: &'a ResourceRef,
        key: &'a str,
    ) -> EngineFuture<'a, Output, Self::Error>;
}
