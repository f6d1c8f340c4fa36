use opsgate_core::{registry, OperationDescriptor, UpstreamBinding};
use serde::Serialize;

use super::{to_pretty_json, CommandResult};

#[derive(Debug, Serialize)]
struct CatalogEntry {
    id: String,
    display_name: &'static str,
    description: &'static str,
    params: Vec<String>,
    binding: String,
    verb: Option<String>,
}

pub fn run(json_output: bool) -> CommandResult {
    let entries: Vec<CatalogEntry> = registry().iter().map(entry).collect();

    if json_output {
        return to_pretty_json("catalog", &entries);
    }

    let mut lines = vec![format!("{} read-only operations:", entries.len())];
    for entry in &entries {
        let params =
            if entry.params.is_empty() { "-".to_string() } else { entry.params.join(", ") };
        lines.push(format!(
            "- {} ({}) params: {params}; upstream: {}",
            entry.id, entry.display_name, entry.binding
        ));
    }
    CommandResult::text(lines.join("\n"))
}

fn entry(descriptor: &OperationDescriptor) -> CatalogEntry {
    CatalogEntry {
        id: descriptor.id.to_string(),
        display_name: descriptor.display_name,
        description: descriptor.description,
        params: descriptor.params.iter().map(label).collect(),
        binding: binding_label(&descriptor.binding),
        verb: descriptor.binding.verb().map(|verb| label(&verb)),
    }
}

fn binding_label(binding: &UpstreamBinding) -> String {
    match binding {
        UpstreamBinding::Management(read) => format!("management/{}", label(read)),
        UpstreamBinding::Cluster(read) => format!("cluster/{}", label(read)),
        UpstreamBinding::Simulated => "simulated".to_string(),
        UpstreamBinding::Local => "local".to_string(),
    }
}

/// The snake_case serde name of a unit enum variant.
fn label(value: &impl Serialize) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use opsgate_core::operations::{ClusterRead, ManagementRead};
    use opsgate_core::UpstreamBinding;

    use super::binding_label;

    #[test]
    fn bindings_render_with_their_upstream() {
        assert_eq!(
            binding_label(&UpstreamBinding::Cluster(ClusterRead::ReadPodLog)),
            "cluster/read_pod_log"
        );
        assert_eq!(
            binding_label(&UpstreamBinding::Management(ManagementRead::GetSubscription)),
            "management/get_subscription"
        );
        assert_eq!(binding_label(&UpstreamBinding::Simulated), "simulated");
    }
}
