use serde::{Deserialize, Serialize};

/// Fleet pub/sub configuration.
/// Exposed in `momentum.toml` under the `[fleet]` section. Disabled by
/// default: a single process needs no fabric and the router degrades to
/// local registry + offline queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Whether this process joins a fleet at all.
    #[serde(default)]
    pub enabled: bool,

    /// libp2p TCP listener port (separate from the HTTP port).
    /// Default: 8465
    #[serde(default = "default_fleet_port")]
    pub port: u16,

    /// Multiaddrs of other fleet processes to dial at startup,
    /// e.g. "/ip4/10.0.0.7/tcp/8465".
    #[serde(default)]
    pub peers: Vec<String>,

    /// Gossipsub mesh degree (D parameter): peers to maintain per topic.
    /// Default: 4 — fleets are small, the gossipsub default of 6 over-peers.
    #[serde(default = "default_mesh_n")]
    pub mesh_n: usize,

    /// Mesh low watermark (D_lo): repair below this. Default: 3
    #[serde(default = "default_mesh_n_low")]
    pub mesh_n_low: usize,

    /// Mesh high watermark (D_hi): prune above this. Default: 8
    #[serde(default = "default_mesh_n_high")]
    pub mesh_n_high: usize,

    /// Maximum size of a single gossip message in bytes.
    /// Default: 65536 (64 KiB — event envelopes are small JSON)
    #[serde(default = "default_max_transmit_size")]
    pub max_transmit_size: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_fleet_port(),
            peers: Vec::new(),
            mesh_n: default_mesh_n(),
            mesh_n_low: default_mesh_n_low(),
            mesh_n_high: default_mesh_n_high(),
            max_transmit_size: default_max_transmit_size(),
        }
    }
}

fn default_fleet_port() -> u16 {
    8465
}
fn default_mesh_n() -> usize {
    4
}
fn default_mesh_n_low() -> usize {
    3
}
fn default_mesh_n_high() -> usize {
    8
}
fn default_max_transmit_size() -> usize {
    65536
}
