// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command/DTO <-> wire message mapping.
//!
//! Mappers are registered at startup as (application type, wire type,
//! constructor) triples. Instances are built on first use and cached for the
//! life of the registry.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{BoxError, MapperError};
use crate::report::Reporter;

/// Type-erased protobuf message as it crosses the registries and the chain.
pub trait WireMessage: Send + Sync + fmt::Debug + 'static {
    fn message_name(&self) -> &'static str;
    fn encode_to_bytes(&self) -> Vec<u8>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<M> WireMessage for M
where
    M: prost::Message + 'static,
{
    fn message_name(&self) -> &'static str {
        type_name::<M>()
    }

    fn encode_to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Application object (command, query result, DTO) after type erasure.
pub type Object = Box<dyn Any + Send>;

/// Converter between one application type and its wire message.
pub trait Mapper: Send + Sync + 'static {
    type Object: Send + 'static;
    type Message: prost::Message + Default + 'static;

    fn to_message(&self, object: &Self::Object) -> Result<Self::Message, BoxError>;

    /// `registry` resolves nested messages that have their own mapper.
    fn from_message(
        &self,
        message: Self::Message,
        registry: &MapperRegistry,
    ) -> Result<Self::Object, BoxError>;
}

trait ErasedMapper: Send + Sync {
    fn to_message(&self, object: &dyn Any) -> Result<Box<dyn WireMessage>, MapperError>;
    fn from_message(
        &self,
        message: Box<dyn Any + Send>,
        registry: &MapperRegistry,
    ) -> Result<Object, MapperError>;
}

struct Erased<M>(M);

impl<M: Mapper> ErasedMapper for Erased<M> {
    fn to_message(&self, object: &dyn Any) -> Result<Box<dyn WireMessage>, MapperError> {
        let object = object
            .downcast_ref::<M::Object>()
            .ok_or(MapperError::TypeMismatch {
                expected: type_name::<M::Object>(),
            })?;
        let message = self
            .0
            .to_message(object)
            .map_err(|source| MapperError::Mapping {
                type_name: type_name::<M::Object>(),
                source,
            })?;
        Ok(Box::new(message))
    }

    fn from_message(
        &self,
        message: Box<dyn Any + Send>,
        registry: &MapperRegistry,
    ) -> Result<Object, MapperError> {
        let message = message
            .downcast::<M::Message>()
            .map_err(|_| MapperError::TypeMismatch {
                expected: type_name::<M::Message>(),
            })?;
        let object = self
            .0
            .from_message(*message, registry)
            .map_err(|source| MapperError::Mapping {
                type_name: type_name::<M::Object>(),
                source,
            })?;
        Ok(Box::new(object))
    }
}

type MapperFactory = Box<dyn Fn() -> Arc<dyn ErasedMapper> + Send + Sync>;

struct Registration {
    object_name: &'static str,
    factory: MapperFactory,
}

static GLOBAL: OnceLock<Arc<MapperRegistry>> = OnceLock::new();

pub struct MapperRegistry {
    mappers: HashMap<TypeId, Registration>,
    object_to_message: HashMap<TypeId, TypeId>,
    message_to_object: HashMap<TypeId, TypeId>,
    resolved: RwLock<HashMap<TypeId, Arc<dyn ErasedMapper>>>,
    reporter: Arc<dyn Reporter>,
}

impl MapperRegistry {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            mappers: HashMap::new(),
            object_to_message: HashMap::new(),
            message_to_object: HashMap::new(),
            resolved: RwLock::new(HashMap::new()),
            reporter,
        }
    }

    /// Registers a mapper constructor. The constructor runs on first use.
    ///
    /// A second registration for an application type or wire type that is
    /// already taken is rejected and the first one stays in force.
    pub fn register<M, F>(&mut self, factory: F) -> Result<(), MapperError>
    where
        M: Mapper,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let object = TypeId::of::<M::Object>();
        let message = TypeId::of::<M::Message>();
        if self.object_to_message.contains_key(&object) {
            tracing::warn!(target: "grpc_shared::mapper", object = type_name::<M::Object>(), "duplicate mapper registration rejected");
            return Err(MapperError::DuplicateRegistration(
                type_name::<M::Object>().to_string(),
            ));
        }
        if self.message_to_object.contains_key(&message) {
            tracing::warn!(target: "grpc_shared::mapper", message = type_name::<M::Message>(), "duplicate mapper registration rejected");
            return Err(MapperError::DuplicateRegistration(
                type_name::<M::Message>().to_string(),
            ));
        }
        self.object_to_message.insert(object, message);
        self.message_to_object.insert(message, object);
        self.mappers.insert(
            object,
            Registration {
                object_name: type_name::<M::Object>(),
                factory: Box::new(move || Arc::new(Erased(factory())) as Arc<dyn ErasedMapper>),
            },
        );
        tracing::debug!(
            target: "grpc_shared::mapper",
            object = type_name::<M::Object>(),
            message = type_name::<M::Message>(),
            "mapper registered"
        );
        Ok(())
    }

    pub fn has_mapper(&self, object: &dyn Any) -> bool {
        self.object_to_message.contains_key(&Any::type_id(object))
    }

    pub fn has_message_mapper(&self, message: &dyn WireMessage) -> bool {
        self.message_to_object
            .contains_key(&Any::type_id(message.as_any()))
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    pub fn to_wire_message(&self, object: &dyn Any) -> Result<Box<dyn WireMessage>, MapperError> {
        let object_type = Any::type_id(object);
        if !self.object_to_message.contains_key(&object_type) {
            return Err(MapperError::NotFound(
                "unregistered application object".to_string(),
            ));
        }
        self.resolve(object_type)?.to_message(object)
    }

    /// Converts a wire message to its application object.
    ///
    /// A structural mapping failure is handed to the reporter and returned
    /// as [`MapperError::Mapping`]. A failure raised by a nested conversion
    /// was reported where it happened and is not reported again.
    pub fn from_wire_message(&self, message: Box<dyn WireMessage>) -> Result<Object, MapperError> {
        let message_type = Any::type_id(message.as_any());
        let Some(object_type) = self.message_to_object.get(&message_type).copied() else {
            return Err(MapperError::NotFound(message.message_name().to_string()));
        };
        let mapper = self.resolve(object_type)?;
        match mapper.from_message(message.into_any(), self) {
            Ok(object) => Ok(object),
            Err(err) => {
                if matches!(err, MapperError::Mapping { .. }) && !wraps_mapping_failure(&err) {
                    self.reporter.report(&err);
                }
                Err(err)
            }
        }
    }

    pub fn to_message<O, M>(&self, object: &O) -> Result<M, MapperError>
    where
        O: Any,
        M: prost::Message + 'static,
    {
        self.to_wire_message(object)?
            .into_any()
            .downcast::<M>()
            .map(|message| *message)
            .map_err(|_| MapperError::TypeMismatch {
                expected: type_name::<M>(),
            })
    }

    pub fn from_message<O, M>(&self, message: M) -> Result<O, MapperError>
    where
        O: Any,
        M: prost::Message + 'static,
    {
        self.from_wire_message(Box::new(message))?
            .downcast::<O>()
            .map(|object| *object)
            .map_err(|_| MapperError::TypeMismatch {
                expected: type_name::<O>(),
            })
    }

    fn resolve(&self, object_type: TypeId) -> Result<Arc<dyn ErasedMapper>, MapperError> {
        if let Some(mapper) = self.resolved.read().get(&object_type) {
            return Ok(Arc::clone(mapper));
        }
        let registration = self
            .mappers
            .get(&object_type)
            .ok_or_else(|| MapperError::NotFound("unregistered application object".to_string()))?;
        let mut resolved = self.resolved.write();
        let mapper = resolved.entry(object_type).or_insert_with(|| {
            tracing::debug!(target: "grpc_shared::mapper", object = registration.object_name, "mapper instantiated");
            (registration.factory)()
        });
        Ok(Arc::clone(mapper))
    }

    /// Installs the process-wide registry. Only the first call succeeds.
    pub fn install_global(registry: Arc<Self>) -> Result<(), Arc<Self>> {
        GLOBAL.set(registry)
    }

    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }
}

/// True when the failure only wraps a nested conversion that already failed
/// (and was reported) inside the registry.
fn wraps_mapping_failure(err: &MapperError) -> bool {
    match err {
        MapperError::Mapping { source, .. } => source
            .downcast_ref::<MapperError>()
            .is_some_and(|inner| matches!(inner, MapperError::Mapping { .. })),
        _ => false,
    }
}

impl fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<&'static str> =
            self.mappers.values().map(|r| r.object_name).collect();
        registered.sort_unstable();
        f.debug_struct("MapperRegistry")
            .field("registered", &registered)
            .field("resolved", &self.resolved.read().len())
            .finish()
    }
}

type FieldResolver = Box<dyn Fn(Value, &MapperRegistry) -> Result<Value, BoxError> + Send + Sync>;

/// Default mapping strategy every per-type mapper can build on: the object
/// goes through a JSON tree that is merged into a fresh wire message, and
/// back.
///
/// Message-typed fields declared with [`JsonMapper::nested_field`],
/// [`JsonMapper::repeated_field`] or [`JsonMapper::map_field`] are converted
/// through the registry on the way back, element by element, so a nested
/// type keeps its own mapper.
pub struct JsonMapper<O, M> {
    nested: Vec<(&'static str, FieldResolver)>,
    _types: PhantomData<fn() -> (O, M)>,
}

impl<O, M> JsonMapper<O, M> {
    pub fn new() -> Self {
        Self {
            nested: Vec::new(),
            _types: PhantomData,
        }
    }

    /// Singular message field holding an `N` that maps to `T`.
    #[must_use]
    pub fn nested_field<N, T>(mut self, field: &'static str) -> Self
    where
        N: prost::Message + DeserializeOwned + 'static,
        T: Serialize + 'static,
    {
        self.nested.push((field, Box::new(resolve_nested::<N, T>)));
        self
    }

    /// Repeated message field; elements keep their order.
    #[must_use]
    pub fn repeated_field<N, T>(mut self, field: &'static str) -> Self
    where
        N: prost::Message + DeserializeOwned + 'static,
        T: Serialize + 'static,
    {
        self.nested.push((field, Box::new(resolve_repeated::<N, T>)));
        self
    }

    /// Map field with message values; keys are kept as they are.
    #[must_use]
    pub fn map_field<N, T>(mut self, field: &'static str) -> Self
    where
        N: prost::Message + DeserializeOwned + 'static,
        T: Serialize + 'static,
    {
        self.nested.push((field, Box::new(resolve_map::<N, T>)));
        self
    }
}

impl<O, M> Default for JsonMapper<O, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O, M> Mapper for JsonMapper<O, M>
where
    O: Serialize + DeserializeOwned + Send + 'static,
    M: prost::Message + Default + Serialize + DeserializeOwned + 'static,
{
    type Object = O;
    type Message = M;

    fn to_message(&self, object: &O) -> Result<M, BoxError> {
        object_to_message(object)
    }

    fn from_message(&self, message: M, registry: &MapperRegistry) -> Result<O, BoxError> {
        if self.nested.is_empty() {
            return message_to_object(&message);
        }
        let mut tree = serde_json::to_value(&message)?;
        let mut resolved = Vec::with_capacity(self.nested.len());
        if let Value::Object(fields) = &mut tree {
            for (field, resolve) in &self.nested {
                if let Some(value) = fields.remove(*field) {
                    resolved.push((*field, resolve(value, registry)?));
                }
            }
        }
        // Resolved values are already application-side and skip the
        // empty-string normalization.
        let mut tree = normalize_tree(tree);
        if let Value::Object(fields) = &mut tree {
            for (field, value) in resolved {
                if !value.is_null() {
                    fields.insert(field.to_string(), value);
                }
            }
        }
        Ok(serde_json::from_value(tree)?)
    }
}

/// One nested wire value through the registry: JSON -> `N` -> mapper ->
/// `T` -> JSON. Null stays null.
fn resolve_nested<N, T>(value: Value, registry: &MapperRegistry) -> Result<Value, BoxError>
where
    N: prost::Message + DeserializeOwned + 'static,
    T: Serialize + 'static,
{
    if value.is_null() {
        return Ok(Value::Null);
    }
    let message: N = serde_json::from_value(value)?;
    let object: T = registry.from_message(message)?;
    Ok(serde_json::to_value(object)?)
}

fn resolve_repeated<N, T>(value: Value, registry: &MapperRegistry) -> Result<Value, BoxError>
where
    N: prost::Message + DeserializeOwned + 'static,
    T: Serialize + 'static,
{
    match value {
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|item| resolve_nested::<N, T>(item, registry))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other),
    }
}

fn resolve_map<N, T>(value: Value, registry: &MapperRegistry) -> Result<Value, BoxError>
where
    N: prost::Message + DeserializeOwned + 'static,
    T: Serialize + 'static,
{
    match value {
        Value::Object(entries) => Ok(Value::Object(
            entries
                .into_iter()
                .map(|(key, item)| -> Result<(String, Value), BoxError> {
                    Ok((key, resolve_nested::<N, T>(item, registry)?))
                })
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other),
    }
}

/// Object -> JSON tree -> merge into `M::default()`.
///
/// An empty tree returns the default message untouched. Keys the message
/// does not know are ignored and nulls keep the field default. An empty
/// object on the message side (a map field) takes the object's entries.
pub fn object_to_message<O, M>(object: &O) -> Result<M, BoxError>
where
    O: Serialize,
    M: Default + Serialize + DeserializeOwned,
{
    let tree = serde_json::to_value(object)?;
    if is_empty_tree(&tree) {
        return Ok(M::default());
    }
    let mut base = serde_json::to_value(M::default())?;
    merge_tree(&mut base, tree);
    Ok(serde_json::from_value(base)?)
}

/// Message -> JSON tree -> object. Empty strings inside objects are treated
/// as unset and dropped before the object is built.
pub fn message_to_object<M, O>(message: &M) -> Result<O, BoxError>
where
    M: Serialize,
    O: DeserializeOwned,
{
    let tree = normalize_tree(serde_json::to_value(message)?);
    Ok(serde_json::from_value(tree)?)
}

fn is_empty_tree(tree: &Value) -> bool {
    match tree {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn merge_tree(base: &mut Value, patch: Value) {
    match (base, patch) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(patch)) if base.is_empty() => {
            *base = match strip_nulls(Value::Object(patch)) {
                Value::Object(patch) => patch,
                _ => Map::new(),
            };
        }
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                if let Some(slot) = base.get_mut(&key) {
                    merge_tree(slot, value);
                }
            }
        }
        (slot, value) => *slot = strip_nulls(value),
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

fn normalize_tree(value: Value) -> Value {
    match value {
        Value::String(s) if s.is_empty() => Value::Null,
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_tree).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_tree(v)))
                .filter(|(_, v)| !v.is_null())
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}
