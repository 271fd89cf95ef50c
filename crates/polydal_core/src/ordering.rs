//! In-memory ordering of entity result sets.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::types::OrderBy;
use polydal_storage::SortDirection;
use polydal_value::Value;
use std::cmp::Ordering;

/// Sorts entities by the requested fields.
///
/// Null (or unset) values sort before every present value in both
/// directions; the direction only applies among present values. Ties fall
/// through to the next ordering term. The sort is stable.
///
/// # Errors
///
/// Returns [`CoreError::Unsortable`] if an ordering field holds a list or
/// byte value, and a configuration error for an undefined field.
pub fn sort_entities(entities: &mut [Entity], order: &[OrderBy]) -> CoreResult<()> {
    if order.is_empty() || entities.is_empty() {
        return Ok(());
    }

    let class = entities[0].class();
    let mut fields = Vec::with_capacity(order.len());
    for term in order {
        fields.push((class.field(&term.field)?.name, term.direction));
    }

    // Every value must be orderable before the comparator runs.
    for entity in entities.iter() {
        for (field, _) in &fields {
            if let Some(value @ (Value::List(_) | Value::Bytes(_))) = entity.get(field) {
                return Err(CoreError::Unsortable {
                    field: (*field).to_string(),
                    type_name: value.type_name(),
                });
            }
        }
    }

    entities.sort_by(|a, b| {
        fields
            .iter()
            .map(|(field, direction)| {
                compare_nulls_first(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                    *direction,
                )
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    Ok(())
}

/// Compares two orderable values; nulls first regardless of direction.
pub(crate) fn compare_nulls_first(a: &Value, b: &Value, direction: SortDirection) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => {
            let ordering = a.compare_native(b).unwrap_or(Ordering::Equal);
            match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Backend, EntityClass, FieldDefinition, FieldType, SqlTable};
    use proptest::prelude::*;

    static FIELDS: &[FieldDefinition] = &[
        FieldDefinition::sql("id", FieldType::Integer),
        FieldDefinition::sql("city", FieldType::Text).optional(),
        FieldDefinition::sql("age", FieldType::Integer).optional(),
        FieldDefinition::sql("tags", FieldType::Text).optional(),
    ];

    static PERSON: EntityClass = EntityClass::new(
        "Person",
        Backend::Sql(SqlTable {
            table: "people",
            primary_key: &["id"],
        }),
        FIELDS,
    );

    fn person(id: i64, city: Option<&str>, age: Option<i64>) -> Entity {
        Entity::with_values(
            &PERSON,
            [("id", Value::Integer(id)), ("city", city.into()), ("age", age.map(Value::Integer).into())],
        )
        .unwrap()
    }

    fn ids(entities: &[Entity]) -> Vec<i64> {
        entities
            .iter()
            .filter_map(|e| e.get("id").and_then(Value::as_integer))
            .collect()
    }

    #[test]
    fn nulls_first_in_both_directions() {
        let mut people = vec![
            person(1, Some("Oslo"), None),
            person(2, None, None),
            person(3, Some("Bergen"), None),
        ];
        sort_entities(&mut people, &[OrderBy::asc("city")]).unwrap();
        assert_eq!(ids(&people), [2, 3, 1]);

        sort_entities(&mut people, &[OrderBy::desc("city")]).unwrap();
        assert_eq!(ids(&people), [2, 1, 3]);
    }

    #[test]
    fn ties_fall_through() {
        let mut people = vec![
            person(1, Some("Oslo"), Some(40)),
            person(2, Some("Oslo"), Some(30)),
            person(3, Some("Bergen"), Some(50)),
        ];
        sort_entities(&mut people, &[OrderBy::asc("city"), OrderBy::asc("age")]).unwrap();
        assert_eq!(ids(&people), [3, 2, 1]);
    }

    #[test]
    fn lists_are_unsortable() {
        let mut tagged = person(1, None, None);
        tagged.set("tags", Value::List(vec![Value::from("a")])).unwrap();
        let mut people = vec![tagged, person(2, None, None)];
        let err = sort_entities(&mut people, &[OrderBy::asc("tags")]).unwrap_err();
        assert!(matches!(err, CoreError::Unsortable { .. }));
    }

    #[test]
    fn unknown_field_is_configuration_error() {
        let mut people = vec![person(1, None, None)];
        assert!(sort_entities(&mut people, &[OrderBy::asc("salary")]).is_err());
    }

    proptest! {
        #[test]
        fn nulls_precede_present_values(
            ages in prop::collection::vec(prop::option::of(0i64..100), 1..20),
            descending in any::<bool>(),
        ) {
            let mut people: Vec<Entity> = ages
                .iter()
                .enumerate()
                .map(|(i, age)| person(i as i64, None, *age))
                .collect();
            let order = if descending { OrderBy::desc("age") } else { OrderBy::asc("age") };
            sort_entities(&mut people, &[order]).unwrap();

            let nulls = ages.iter().filter(|a| a.is_none()).count();
            for (i, entity) in people.iter().enumerate() {
                prop_assert_eq!(entity.is_set("age"), i >= nulls);
            }
        }
    }
}
