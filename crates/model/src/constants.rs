pub const CONTROLLER_NAME: &str = "nsgate.io/ingress-controller";
pub const DEFAULT_INGRESS_CLASS: &str = "nsgate";
pub const ANNOTATION_INGRESS_CLASS: &str = "kubernetes.io/ingress.class";
pub const ANNOTATION_STATUS: &str = "nsgate.io/status";

pub const WILDCARD_HOST: &str = "*";
pub const DEFAULT_PATH: &str = "/";

pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 500;
pub const DEFAULT_BACKOFF_CEILING_MS: u64 = 60_000;
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;
pub const DEFAULT_METRICS_PORT: u16 = 9913;
