use opc_da_browse::{
    BrowseElement, ElementFilter, ElementKind, ItemProperties, OpcError, OpcProvider, OpcResult,
    PropertiesQuery, friendly_com_hint, property_ids,
};
use std::future::Future;
use std::time::Duration;

/// Awaits `fut`, turning an elapsed deadline into an internal error.
pub async fn with_timeout<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = OpcResult<T>>,
) -> OpcResult<T> {
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        tracing::error!(what, secs = timeout.as_secs(), "Operation timed out");
        Err(OpcError::Internal(format!(
            "{what} timed out ({}s)",
            timeout.as_secs()
        )))
    })
}

pub async fn list_servers(
    provider: &dyn OpcProvider,
    host: &str,
    timeout: Duration,
) -> OpcResult<Vec<String>> {
    let servers = with_timeout(timeout, "Server listing", provider.list_servers(host)).await?;
    tracing::info!(count = servers.len(), host, "Listed servers");
    Ok(servers)
}

pub async fn browse(
    provider: &dyn OpcProvider,
    server: &str,
    parent: Option<String>,
    filter: ElementFilter,
    query: Option<PropertiesQuery>,
    timeout: Duration,
) -> OpcResult<Vec<String>> {
    let elements = with_timeout(
        timeout,
        "Browse",
        provider.list_elements(server, parent, filter, query),
    )
    .await?;
    tracing::info!(count = elements.len(), server, "Listed elements");

    let mut lines = Vec::new();
    for element in &elements {
        lines.push(format_element(element));
        if !element.properties.is_empty() || element.properties.error.is_some() {
            lines.extend(format_properties(&element.properties).into_iter().map(|l| format!("  {l}")));
        }
    }
    Ok(lines)
}

pub async fn properties(
    provider: &dyn OpcProvider,
    server: &str,
    item_ids: Vec<String>,
    query: PropertiesQuery,
    timeout: Duration,
) -> OpcResult<Vec<String>> {
    let records = with_timeout(
        timeout,
        "Property fetch",
        provider.get_properties(server, item_ids.clone(), query),
    )
    .await?;

    let mut lines = Vec::new();
    for (item_id, record) in item_ids.iter().zip(&records) {
        lines.push(item_id.clone());
        lines.extend(format_properties(record).into_iter().map(|l| format!("  {l}")));
    }
    Ok(lines)
}

/// One line per element: kind marker, browse name and item id.
pub fn format_element(element: &BrowseElement) -> String {
    let marker = match element.kind {
        ElementKind::Branch => "+",
        ElementKind::Leaf => "-",
    };
    match &element.item_id {
        Some(id) if id != &element.name => format!("{marker} {}  ({id})", element.name),
        _ => format!("{marker} {}", element.name),
    }
}

pub fn format_properties(record: &ItemProperties) -> Vec<String> {
    if let Some(reason) = &record.error {
        return vec![format!("error: {reason}")];
    }
    record
        .properties
        .iter()
        .map(|p| {
            let description = if p.description.is_empty() {
                property_ids::name(p.id).unwrap_or("?")
            } else {
                p.description.as_str()
            };
            let mut line = format!("{:>5}  {description}", p.id);
            if let Some(value) = &p.value {
                line.push_str(&format!(" = {value}"));
            }
            if let Some(error) = &p.error {
                line.push_str(&format!(" [error: {error}]"));
            }
            if let Some(item_id) = &p.item_id {
                line.push_str(&format!(" <{item_id}>"));
            }
            line
        })
        .collect()
}

/// Error text for the terminal, with a hint per failed revision.
pub fn describe_error(error: &OpcError) -> String {
    match error {
        OpcError::Aggregate(failures) => {
            let mut text = String::from("every protocol revision failed:");
            for failure in failures {
                text.push_str(&format!("\n  [{}] {}", failure.revision, failure.error));
                if let Some(hint) = friendly_com_hint(&failure.error) {
                    text.push_str(&format!("\n      hint: {hint}"));
                }
            }
            text
        }
        other => match friendly_com_hint(other) {
            Some(hint) => format!("{other}\n  hint: {hint}"),
            None => other.to_string(),
        },
    }
}
