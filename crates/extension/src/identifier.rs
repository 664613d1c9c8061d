//! Composite primary identifiers.
//!
//! A real resource is identified by `stack|logical|external`, where the last
//! component is the id assigned by the external system. A read-only resource
//! has no external id and is identified by `stack|logical`.

use crate::error::HandlerError;

pub const SEPARATOR: char = '|';
/// Stands in for a stack or logical id CloudFormation did not supply.
pub const MISSING_COMPONENT: &str = "unknown";

pub fn generate_id_read_only(stack_id: Option<&str>, logical_resource_id: Option<&str>) -> String {
    format!(
        "{}{SEPARATOR}{}",
        stack_id.unwrap_or(MISSING_COMPONENT),
        logical_resource_id.unwrap_or(MISSING_COMPONENT)
    )
}

pub fn generate_id(
    stack_id: Option<&str>,
    logical_resource_id: Option<&str>,
    resource_identifier: &str,
) -> String {
    format!(
        "{}{SEPARATOR}{resource_identifier}",
        generate_id_read_only(stack_id, logical_resource_id)
    )
}

/// The external id within a composite identifier.
///
/// Everything after the second separator belongs to the external id, so ids
/// containing the separator survive a round trip. For a read-only identifier
/// the logical id is returned.
pub fn naked_identifier_from_string(identifier: &str) -> Result<String, HandlerError> {
    let parts: Vec<&str> = identifier.splitn(3, SEPARATOR).collect();

    let naked: &str = match parts.as_slice() {
        [_, _, external] => *external,
        [_, logical] => *logical,
        _ => {
            return Err(HandlerError::MalformedIdentifier(format!(
                "{identifier:?} has no {SEPARATOR:?} separator"
            )));
        }
    };

    if naked.is_empty() {
        return Err(HandlerError::MalformedIdentifier(format!(
            "{identifier:?} has an empty trailing component"
        )));
    }

    Ok(naked.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STACK: &str = "arn:aws:cloudformation:eu-west-2:123456789012:stack/test/abc";

    #[test]
    fn read_only_identifier_joins_stack_and_logical_ids() {
        assert_eq!(
            format!("{STACK}|GroupInfo"),
            generate_id_read_only(Some(STACK), Some("GroupInfo"))
        );
    }

    #[test]
    fn missing_components_use_placeholder() {
        assert_eq!("unknown|unknown", generate_id_read_only(None, None));
        assert_eq!("unknown|Group|abc", generate_id(None, Some("Group"), "abc"));
        assert_eq!(generate_id(None, None, "x"), generate_id(None, None, "x"));
    }

    #[test]
    fn naked_identifier_of_read_only_id_is_logical_id() {
        let identifier: String = generate_id_read_only(Some(STACK), Some("GroupInfo"));

        assert_eq!(
            "GroupInfo",
            naked_identifier_from_string(&identifier).expect("Identifier should parse")
        );
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        for identifier in ["no-separator", "stack|", "stack|logical|", ""] {
            let result = naked_identifier_from_string(identifier);

            assert!(
                matches!(result, Err(HandlerError::MalformedIdentifier(_))),
                "{identifier:?} should be malformed"
            );
        }
    }

    proptest! {
        #[test]
        fn external_id_survives_round_trip(
            stack in proptest::option::of("[a-zA-Z0-9:/-]{0,40}"),
            logical in proptest::option::of("[a-zA-Z0-9]{0,20}"),
            external in "[a-zA-Z0-9|=-]{1,40}",
        ) {
            let identifier: String = generate_id(stack.as_deref(), logical.as_deref(), &external);

            prop_assert_eq!(Ok(external), naked_identifier_from_string(&identifier).map_err(|err| err.to_string()));
        }
    }
}
