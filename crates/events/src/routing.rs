//! Routing-key derivation.

/// Derive the broker routing key from a fully-qualified event type name.
///
/// Segments are split on `.` and lower-cased; the final segment additionally
/// has its PascalCase words separated with `.` before lower-casing:
///
/// `App.Domain.Events.ContractCreated` → `app.domain.events.contract.created`
///
/// The derivation is a pure function of the type name, so producers and
/// consumers agree on it without coordination.
pub fn routing_key(event_type: &str) -> String {
    let segments: Vec<&str> = event_type.split('.').collect();
    let last = segments.len().saturating_sub(1);

    segments
        .iter()
        .enumerate()
        .map(|(idx, segment)| {
            if idx == last {
                split_pascal(segment)
            } else {
                segment.to_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Insert a `.` before every internal upper-case letter, then lower-case.
fn split_pascal(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    for (idx, ch) in segment.chars().enumerate() {
        if idx > 0 && ch.is_uppercase() {
            out.push('.');
        }
        out.extend(ch.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn derives_namespaced_pascal_case_names() {
        assert_eq!(
            routing_key("App.Domain.Events.ContractCreated"),
            "app.domain.events.contract.created"
        );
        assert_eq!(
            routing_key("Vitalerp.Contracts.Events.CateringContracted"),
            "vitalerp.contracts.events.catering.contracted"
        );
    }

    #[test]
    fn only_the_last_segment_is_word_split() {
        assert_eq!(routing_key("AppCore.OrderShipped"), "appcore.order.shipped");
    }

    #[test]
    fn single_segment_names_are_word_split() {
        assert_eq!(routing_key("ContractActivated"), "contract.activated");
    }

    #[test]
    fn lowercase_names_pass_through() {
        assert_eq!(routing_key("app.events.created"), "app.events.created");
    }

    #[test]
    fn consecutive_capitals_each_get_a_separator() {
        assert_eq!(routing_key("Events.ABTest"), "events.a.b.test");
    }

    proptest! {
        #[test]
        fn output_is_always_lowercase(name in "[A-Za-z]{1,12}(\\.[A-Za-z]{1,12}){0,4}") {
            let key = routing_key(&name);
            prop_assert!(key.chars().all(|c| !c.is_uppercase()));
        }

        #[test]
        fn derivation_is_idempotent(name in "[A-Za-z]{1,12}(\\.[A-Za-z]{1,12}){0,4}") {
            let once = routing_key(&name);
            prop_assert_eq!(routing_key(&once), once.clone());
        }
    }
}
