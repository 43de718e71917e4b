use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
}

#[derive(Debug, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_system_file")]
    pub system_file: String,
    #[serde(default = "default_net_file")]
    pub net_file: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            system_file: default_system_file(),
            net_file: default_net_file(),
            output_file: default_output_file(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouterOrder {
    Global,
    PerSignal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    #[serde(default = "default_hop_slack")]
    pub hop_slack: usize,
    #[serde(default = "default_max_solutions")]
    pub max_solutions: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_router_order")]
    pub router_order: RouterOrder,
    #[serde(default = "default_negotiation_rounds")]
    pub negotiation_rounds: usize,
    #[serde(default)]
    pub channel_capacity: Option<u32>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            hop_slack: default_hop_slack(),
            max_solutions: default_max_solutions(),
            max_candidates: default_max_candidates(),
            router_order: default_router_order(),
            negotiation_rounds: default_negotiation_rounds(),
            channel_capacity: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OptimizationConfig {
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default = "default_edge_rr")]
    pub edge_rr: bool,
    #[serde(default = "default_max_edge_sweeps")]
    pub max_edge_sweeps: usize,
    #[serde(default = "default_critical_fraction")]
    pub critical_fraction: f64,
    #[serde(default = "default_congestion_fraction")]
    pub congestion_fraction: f64,
    #[serde(default = "default_repeat_exemption_depth")]
    pub repeat_exemption_depth: usize,
    #[serde(default = "default_penalty_step")]
    pub penalty_step: f64,
    #[serde(default = "default_repeat_discount")]
    pub repeat_discount: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            edge_rr: default_edge_rr(),
            max_edge_sweeps: default_max_edge_sweeps(),
            critical_fraction: default_critical_fraction(),
            congestion_fraction: default_congestion_fraction(),
            repeat_exemption_depth: default_repeat_exemption_depth(),
            penalty_step: default_penalty_step(),
            repeat_discount: default_repeat_discount(),
        }
    }
}

fn default_system_file() -> String {
    "inputs/design.system".to_string()
}

fn default_net_file() -> String {
    "inputs/design.net".to_string()
}

fn default_output_file() -> String {
    "output/result.txt".to_string()
}

fn default_hop_slack() -> usize {
    1
}

fn default_max_solutions() -> usize {
    6
}

fn default_max_candidates() -> usize {
    512
}

fn default_router_order() -> RouterOrder {
    RouterOrder::Global
}

fn default_negotiation_rounds() -> usize {
    2
}

fn default_rounds() -> usize {
    3
}

fn default_edge_rr() -> bool {
    true
}

fn default_max_edge_sweeps() -> usize {
    50
}

fn default_critical_fraction() -> f64 {
    0.5
}

fn default_congestion_fraction() -> f64 {
    0.1
}

fn default_repeat_exemption_depth() -> usize {
    1
}

fn default_penalty_step() -> f64 {
    0.05
}

fn default_repeat_discount() -> f64 {
    0.3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.routing.hop_slack, 1);
        assert_eq!(cfg.routing.router_order, RouterOrder::Global);
        assert_eq!(cfg.optimization.critical_fraction, 0.5);
        assert_eq!(cfg.optimization.congestion_fraction, 0.1);
        assert!(cfg.routing.channel_capacity.is_none());
    }

    #[test]
    fn partial_sections_override_fields() {
        let cfg: Config = toml::from_str(
            r#"
            [routing]
            hop_slack = 2
            router_order = "per_signal"
            channel_capacity = 40

            [optimization]
            rounds = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.routing.hop_slack, 2);
        assert_eq!(cfg.routing.router_order, RouterOrder::PerSignal);
        assert_eq!(cfg.routing.channel_capacity, Some(40));
        assert_eq!(cfg.routing.max_solutions, 6);
        assert_eq!(cfg.optimization.rounds, 5);
        assert_eq!(cfg.optimization.repeat_exemption_depth, 1);
        assert_eq!(cfg.input.net_file, "inputs/design.net");
    }
}
