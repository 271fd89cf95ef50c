//! Change-tracking entity instances.

use super::adjust::normalize;
use super::EntityClass;
use crate::error::{CoreError, CoreResult};
use polydal_value::Value;
use std::collections::BTreeMap;

/// Field values keyed by canonical field name.
pub type FieldValues = BTreeMap<&'static str, Value>;

/// An instance of an entity class with snapshot-based change tracking.
///
/// The original snapshot is captured once, at construction, after
/// normalization. It is a deep copy: mutating the live values never touches
/// it. Dirty checking compares live values against the snapshot with loose
/// equality, restricted to the class's defined fields.
///
/// A polyglot entity additionally owns one physical entity ("part") per
/// mapped class.
///
/// # Example
///
/// ```rust
/// use polydal_core::{Backend, Entity, EntityClass, FieldDefinition, FieldType, SqlTable};
/// use polydal_value::Value;
///
/// static FIELDS: &[FieldDefinition] = &[
///     FieldDefinition::sql("id", FieldType::Integer),
///     FieldDefinition::sql("title", FieldType::Text),
/// ];
/// static NOTE: EntityClass = EntityClass::new(
///     "Note",
///     Backend::Sql(SqlTable { table: "notes", primary_key: &["id"] }),
///     FIELDS,
/// );
///
/// let mut note = Entity::with_values(&NOTE, [("id", Value::from("7")), ("title", "draft".into())]).unwrap();
/// assert!(note.modifications().unwrap().is_empty());
///
/// note.set("title", "final").unwrap();
/// let modified = note.modifications().unwrap();
/// assert_eq!(modified.get("title"), Some(&Value::from("final")));
/// assert_eq!(note.original_key_values().unwrap().get("id"), Some(&Value::Integer(7)));
/// ```
#[derive(Debug, Clone)]
pub struct Entity {
    class: &'static EntityClass,
    values: FieldValues,
    original: FieldValues,
    parts: BTreeMap<&'static str, Entity>,
}

impl Entity {
    /// Creates an empty instance.
    #[must_use]
    pub fn new(class: &'static EntityClass) -> Self {
        let mut entity = Self {
            class,
            values: FieldValues::new(),
            original: FieldValues::new(),
            parts: BTreeMap::new(),
        };
        entity.adjust_field_values();
        entity.original = entity.values.clone();
        entity
    }

    /// Creates an instance from field values.
    ///
    /// The snapshot is taken after normalization, so the result carries no
    /// modifications.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a name is not a defined field.
    pub fn with_values<I, K, V>(class: &'static EntityClass, values: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut entity = Self {
            class,
            values: FieldValues::new(),
            original: FieldValues::new(),
            parts: BTreeMap::new(),
        };
        for (name, value) in values {
            let field = class.field(name.as_ref())?;
            entity.values.insert(field.name, value.into());
        }
        entity.adjust_field_values();
        entity.original = entity.values.clone();
        Ok(entity)
    }

    /// Returns a copy whose snapshot is the current state.
    ///
    /// This is what a backend hands out after persisting an entity.
    #[must_use]
    pub fn refreshed(&self) -> Self {
        let mut entity = self.clone();
        entity.parts = self
            .parts
            .iter()
            .map(|(name, part)| (*name, part.refreshed()))
            .collect();
        entity.adjust_field_values();
        entity.original = entity.values.clone();
        entity
    }

    /// Runs backend normalization, then the class hook.
    ///
    /// Idempotent; invoked once per construction.
    pub fn adjust_field_values(&mut self) {
        let class = self.class;
        for field in class.fields {
            if let Some(value) = self.values.remove(field.name) {
                self.values.insert(field.name, normalize(&class.backend, field, value));
            }
        }
        if let Some(hook) = class.hooks.adjust {
            hook(self);
        }
    }

    /// Runs the class validation hook.
    ///
    /// # Errors
    ///
    /// Returns a validation error carrying the hook's message.
    pub fn validate_values(&self) -> CoreResult<()> {
        match self.class.hooks.validate {
            Some(hook) => hook(self).map_err(|message| CoreError::validation(self.class.name, message)),
            None => Ok(()),
        }
    }

    /// Returns the entity class.
    #[must_use]
    pub fn class(&self) -> &'static EntityClass {
        self.class
    }

    /// Returns the current value of a field, if one was assigned.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        let field = self.class.find_field(name)?;
        self.values.get(field.name)
    }

    /// Returns the current value of a field, null if unassigned.
    #[must_use]
    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Returns true if the field holds a non-null value.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some_and(Value::is_present)
    }

    /// Assigns a field.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is not a defined field.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let field = self.class.field(name)?;
        self.values.insert(field.name, value.into());
        Ok(())
    }

    /// Assigns a field, builder style.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is not a defined field.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> CoreResult<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Removes a field's value.
    pub fn unset(&mut self, name: &str) {
        if let Some(field) = self.class.find_field(name) {
            self.values.remove(field.name);
        }
    }

    /// Returns every assigned value, nulls included.
    #[must_use]
    pub fn values(&self) -> &FieldValues {
        &self.values
    }

    /// Returns the non-null values; the filter a template expresses.
    #[must_use]
    pub fn present_values(&self) -> FieldValues {
        self.values
            .iter()
            .filter(|(_, v)| v.is_present())
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Returns the snapshot taken at construction.
    #[must_use]
    pub fn original(&self) -> &FieldValues {
        &self.original
    }

    /// Returns the fields whose value differs from the snapshot.
    ///
    /// Comparison uses loose equality; an unassigned field counts as null.
    ///
    /// # Errors
    ///
    /// Returns the validation error of [`Entity::validate_values`].
    pub fn modifications(&self) -> CoreResult<FieldValues> {
        self.validate_values()?;
        Ok(self.diff())
    }

    /// Returns true if any defined field differs from the snapshot.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        !self.diff().is_empty()
    }

    fn diff(&self) -> FieldValues {
        self.class
            .fields
            .iter()
            .filter_map(|field| {
                let current = self.values.get(field.name).unwrap_or(&Value::Null);
                let original = self.original.get(field.name).unwrap_or(&Value::Null);
                (!current.loosely_equals(original)).then(|| (field.name, current.clone()))
            })
            .collect()
    }

    /// Returns the assigned key values.
    ///
    /// # Errors
    ///
    /// Returns the validation error of [`Entity::validate_values`], or a
    /// configuration error if the class key is malformed.
    pub fn key_values(&self) -> CoreResult<FieldValues> {
        self.validate_values()?;
        self.keys_of(&self.values)
    }

    /// Returns the key values of the snapshot.
    ///
    /// Used to find the stored record of an entity whose key was changed.
    ///
    /// # Errors
    ///
    /// As for [`Entity::key_values`].
    pub fn original_key_values(&self) -> CoreResult<FieldValues> {
        self.validate_values()?;
        self.keys_of(&self.original)
    }

    fn keys_of(&self, values: &FieldValues) -> CoreResult<FieldValues> {
        Ok(self
            .class
            .key_fields()?
            .into_iter()
            .filter_map(|name| {
                values
                    .get(name)
                    .filter(|v| v.is_present())
                    .map(|v| (name, v.clone()))
            })
            .collect())
    }

    /// Returns the key fields without a value.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the class key is malformed.
    pub fn missing_key_fields(&self) -> CoreResult<Vec<&'static str>> {
        Ok(self
            .class
            .key_fields()?
            .into_iter()
            .filter(|name| !self.values.get(name).is_some_and(Value::is_present))
            .collect())
    }

    /// Fails unless every key field holds a value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteKey`] naming the missing fields.
    pub fn require_complete_key(&self) -> CoreResult<FieldValues> {
        let missing = self.missing_key_fields()?;
        if !missing.is_empty() {
            return Err(CoreError::incomplete_key(
                self.class.name,
                missing.into_iter().map(str::to_string).collect(),
            ));
        }
        self.key_values()
    }

    /// Returns the physical part for `class`, if present.
    #[must_use]
    pub fn part(&self, class: &EntityClass) -> Option<&Entity> {
        self.parts.get(class.name).filter(|p| p.class == class)
    }

    pub(crate) fn part_mut(&mut self, class: &EntityClass) -> Option<&mut Entity> {
        self.parts.get_mut(class.name).filter(|p| p.class == class)
    }

    pub(crate) fn set_part(&mut self, part: Entity) {
        self.parts.insert(part.class.name, part);
    }

    /// Returns every physical part.
    pub fn parts(&self) -> impl Iterator<Item = &Entity> {
        self.parts.values()
    }
}
