use common::domain::{DomainError, DomainResult};

/// Inbound MQTT topic classified by what the module should do with it
#[derive(Debug, Clone, PartialEq)]
pub enum InboundTopic {
    /// `{prefix}/inputs/{route}`
    Input { route: String },
    /// `{prefix}/methods/{name}/{request_id}`
    Method { name: String, request_id: String },
    /// `{prefix}/twin/desired`
    DesiredProperties,
}

/// Parse an inbound MQTT topic published under `prefix`
///
/// # Examples
/// ```
/// use edge_module::mqtt::{parse_topic, InboundTopic};
///
/// let parsed = parse_topic("twinbridge", "twinbridge/inputs/fruit").unwrap();
/// assert_eq!(parsed, InboundTopic::Input { route: "fruit".to_string() });
/// ```
pub fn parse_topic(prefix: &str, topic: &str) -> DomainResult<InboundTopic> {
    let rest = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| {
            DomainError::InvalidConfig(format!(
                "Invalid topic '{}': expected prefix '{}'",
                topic, prefix
            ))
        })?;

    let parts: Vec<&str> = rest.split('/').collect();
    if parts.iter().any(|part| part.trim().is_empty()) {
        return Err(DomainError::InvalidConfig(format!(
            "Invalid topic '{}': empty segment",
            topic
        )));
    }

    match parts.as_slice() {
        ["inputs", route] => Ok(InboundTopic::Input {
            route: route.to_string(),
        }),
        // Responses share the methods namespace; never treat them as requests
        ["methods", "res", ..] => Err(DomainError::InvalidConfig(format!(
            "Topic '{}' is a method response",
            topic
        ))),
        ["methods", name, request_id] => Ok(InboundTopic::Method {
            name: name.to_string(),
            request_id: request_id.to_string(),
        }),
        ["twin", "desired"] => Ok(InboundTopic::DesiredProperties),
        _ => Err(DomainError::InvalidConfig(format!(
            "Invalid topic format '{}': expected '{{prefix}}/inputs/{{route}}', \
             '{{prefix}}/methods/{{name}}/{{request_id}}' or '{{prefix}}/twin/desired'",
            topic
        ))),
    }
}

/// Topic filters the module subscribes to
pub fn subscription_filters(prefix: &str) -> [String; 3] {
    [
        format!("{}/inputs/+", prefix),
        format!("{}/methods/+/+", prefix),
        desired_properties_topic(prefix),
    ]
}

pub fn desired_properties_topic(prefix: &str) -> String {
    format!("{}/twin/desired", prefix)
}

pub fn reported_properties_topic(prefix: &str) -> String {
    format!("{}/twin/reported", prefix)
}

pub fn output_topic(prefix: &str, route: &str) -> String {
    format!("{}/outputs/{}", prefix, route)
}

pub fn method_response_topic(prefix: &str, status_code: u16, request_id: &str) -> String {
    format!("{}/methods/res/{}/{}", prefix, status_code, request_id)
}
