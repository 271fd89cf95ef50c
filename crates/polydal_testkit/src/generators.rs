//! Property-based test generators using proptest.
//!
//! Strategies produce values that fit the sample classes in
//! [`fixtures`](crate::fixtures): uids are valid RDN values, ages fit the
//! integer column, mail addresses are distinct per list.

use polydal_value::Value;
use proptest::prelude::*;

/// Strategy for account uids.
pub fn uid_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{2,11}").expect("Invalid regex")
}

/// Strategy for an optional age.
pub fn age_strategy() -> impl Strategy<Value = Option<i64>> {
    prop::option::of(0i64..120)
}

/// Strategy for a set of distinct mail addresses.
pub fn mail_list_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(
        prop::string::string_regex("[a-z]{1,8}@example\\.org").expect("Invalid regex"),
        0..5,
    )
    .prop_map(|set| set.into_iter().collect())
}

/// Strategy for a nickname that may be missing, as a sortable column.
pub fn nullable_text_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[A-Za-z]{1,10}").expect("Invalid regex"))
}

/// Strategy for scalar values of every kind.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
    ]
}

/// Strategy for the depth of a nested transaction.
pub fn nesting_depth_strategy() -> impl Strategy<Value = usize> {
    1usize..8
}

/// A directory mutation on the accounts of the sample directory.
#[derive(Debug, Clone)]
pub enum DirectoryOp {
    /// Insert a new account.
    InsertAccount {
        /// Account uid.
        uid: String,
        /// Initial mail values.
        mail: Vec<String>,
    },
    /// Delete the account at this index of the existing ones.
    DeleteAccount(usize),
    /// Add one mail value to an existing account.
    AddMail(usize, String),
    /// Remove the first mail value of an existing account.
    DeleteFirstMail(usize),
    /// Remove every mail value of an existing account.
    DeleteAllMail(usize),
    /// Replace the mail values of an existing account.
    ReplaceMail(usize, Vec<String>),
}

/// Strategy for one directory mutation.
///
/// Indices select among the accounts present when the op runs, modulo
/// their number.
pub fn directory_op_strategy() -> impl Strategy<Value = DirectoryOp> {
    prop_oneof![
        (uid_strategy(), mail_list_strategy()).prop_map(|(uid, mail)| DirectoryOp::InsertAccount { uid, mail }),
        any::<usize>().prop_map(DirectoryOp::DeleteAccount),
        (
            any::<usize>(),
            prop::string::string_regex("[a-z]{1,8}@example\\.net").expect("Invalid regex")
        )
            .prop_map(|(i, mail)| DirectoryOp::AddMail(i, mail)),
        any::<usize>().prop_map(DirectoryOp::DeleteFirstMail),
        any::<usize>().prop_map(DirectoryOp::DeleteAllMail),
        (any::<usize>(), mail_list_strategy()).prop_map(|(i, mail)| DirectoryOp::ReplaceMail(i, mail)),
    ]
}

/// Strategy for a sequence of directory mutations.
pub fn directory_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<DirectoryOp>> {
    prop::collection::vec(directory_op_strategy(), 1..=max_len.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn uids_are_valid_rdn_values(uid in uid_strategy()) {
            prop_assert!(uid.len() >= 3 && uid.len() <= 12);
            prop_assert!(uid.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }

        #[test]
        fn mail_lists_are_distinct(mail in mail_list_strategy()) {
            let mut sorted = mail.clone();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), mail.len());
        }

        #[test]
        fn op_sequences_respect_bounds(ops in directory_ops_strategy(6)) {
            prop_assert!(!ops.is_empty() && ops.len() <= 6);
        }
    }
}
