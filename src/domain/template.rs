// Panel template catalogue
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TemplateQuery {
    pub id: &'static str,
    pub query: &'static str,
    pub units: &'static str,
    pub resolution: u8,
    /// Legend label applied to whatever series the query returns.
    pub alias: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub icon: &'static str,
    pub operating_system: &'static str,
    pub title: &'static str,
    pub queries: &'static [TemplateQuery],
}

const LINUX: &str = "Linux";
const WINDOWS: &str = "Windows";
const OBSERVABILITY_NODE: &str = "observability-node";

const SYSTEM_METRICS: &str = "System Metrics";
const NETWORK: &str = "Network";
const PROMETHEUS_METRICS: &str = "Prometheus Metrics";
const CUSTOM: &str = "Custom";

const BLANK_DESCRIPTION: &str = "Start with a blank panel and add your own queries";

static TEMPLATES: &[PanelTemplate] = &[
    PanelTemplate {
        id: "cpu-saturation-usage",
        name: "CPU Saturation & Usage",
        description: "Tracks CPU utilization and saturation (load average normalized by core count)",
        category: SYSTEM_METRICS,
        icon: "cpu",
        operating_system: LINUX,
        title: "CPU Saturation & Usage",
        queries: &[
            TemplateQuery {
                id: "cpu-utilization",
                query: r#"100 - (avg by (instance) (rate(node_cpu_seconds_total{mode="idle"}[1m])) * 100)"#,
                units: "%",
                resolution: 2,
                alias: "CPU Utilization",
            },
            TemplateQuery {
                id: "cpu-saturation-load",
                query: r#"node_load1 / count without (cpu, mode) (node_cpu_seconds_total{mode="idle"})"#,
                units: "load",
                resolution: 2,
                alias: "CPU Load per Core",
            },
        ],
    },
    PanelTemplate {
        id: "memory-utilization",
        name: "Memory Utilization",
        description: "Tracks actual used memory using MemAvailable (accounts for cache as available)",
        category: SYSTEM_METRICS,
        icon: "memory",
        operating_system: LINUX,
        title: "Memory Utilization",
        queries: &[TemplateQuery {
            id: "memory-utilization",
            query: "100 * (1 - (node_memory_MemAvailable_bytes / node_memory_MemTotal_bytes))",
            units: "%",
            resolution: 2,
            alias: "Memory Utilization",
        }],
    },
    PanelTemplate {
        id: "disk-io-latency",
        name: "Disk I/O Latency",
        description: "Tracks average time (in seconds) that I/O requests spend waiting to be serviced",
        category: SYSTEM_METRICS,
        icon: "storage",
        operating_system: LINUX,
        title: "Disk I/O Latency",
        queries: &[
            TemplateQuery {
                id: "disk-read-latency",
                query: "rate(node_disk_read_time_seconds_total[1m]) / rate(node_disk_reads_completed_total[1m])",
                units: "s",
                resolution: 3,
                alias: "Disk Read Latency",
            },
            TemplateQuery {
                id: "disk-write-latency",
                query: "rate(node_disk_write_time_seconds_total[1m]) / rate(node_disk_writes_completed_total[1m])",
                units: "s",
                resolution: 3,
                alias: "Disk Write Latency",
            },
        ],
    },
    PanelTemplate {
        id: "network-traffic-drops",
        name: "Network Traffic & Drops",
        description: "Monitors throughput and packet drops (saturation)",
        category: NETWORK,
        icon: "network",
        operating_system: LINUX,
        title: "Network Traffic & Drops",
        queries: &[
            TemplateQuery {
                id: "network-receive-traffic",
                query: "rate(node_network_receive_bytes_total[1m]) * 8",
                units: "bits/s",
                resolution: 2,
                alias: "Network Receive",
            },
            TemplateQuery {
                id: "network-transmit-traffic",
                query: "rate(node_network_transmit_bytes_total[1m]) * 8",
                units: "bits/s",
                resolution: 2,
                alias: "Network Transmit",
            },
            TemplateQuery {
                id: "network-drops",
                query: "rate(node_network_receive_drop_total[1m]) + rate(node_network_transmit_drop_total[1m])",
                units: "packets/s",
                resolution: 2,
                alias: "Network Drops",
            },
        ],
    },
    PanelTemplate {
        id: "windows-cpu-usage-dpc",
        name: "CPU Usage & DPC Spikes",
        description: "Monitors overall CPU usage and DPC Time (driver/hardware interrupts)",
        category: SYSTEM_METRICS,
        icon: "cpu",
        operating_system: WINDOWS,
        title: "CPU Usage & DPC Spikes",
        queries: &[
            TemplateQuery {
                id: "windows-cpu-total-usage",
                query: r#"100 - (avg by (instance) (rate(windows_cpu_time_total{mode="idle"}[1m])) * 100)"#,
                units: "%",
                resolution: 2,
                alias: "CPU Usage",
            },
            TemplateQuery {
                id: "windows-cpu-dpc-interrupts",
                query: r#"100 * sum by (instance) (rate(windows_cpu_time_total{mode=~"dpc|interrupt"}[1m])) / count without(mode)(windows_cpu_time_total{mode="idle"})"#,
                units: "%",
                resolution: 2,
                alias: "DPC/Interrupts",
            },
        ],
    },
    PanelTemplate {
        id: "windows-memory-usage",
        name: "Memory Usage",
        description: "Tracks committed memory bytes vs. total physical memory",
        category: SYSTEM_METRICS,
        icon: "memory",
        operating_system: WINDOWS,
        title: "Memory Usage",
        queries: &[TemplateQuery {
            id: "windows-memory-utilization",
            query: "100 * (1 - (windows_memory_available_bytes / windows_memory_physical_total_bytes))",
            units: "%",
            resolution: 2,
            alias: "Memory Usage",
        }],
    },
    PanelTemplate {
        id: "windows-disk-queue-length",
        name: "Disk Queue Length",
        description: "Disk saturation indicator - if consistently > 1, processes are blocking",
        category: SYSTEM_METRICS,
        icon: "storage",
        operating_system: WINDOWS,
        title: "Disk Queue Length",
        queries: &[TemplateQuery {
            id: "windows-disk-queue",
            query: "windows_logical_disk_requests_queued",
            units: "requests",
            resolution: 2,
            alias: "Disk Queue Length",
        }],
    },
    PanelTemplate {
        id: "windows-system-uptime",
        name: "System Up/Down Status",
        description: "Tracks system availability and uptime",
        category: SYSTEM_METRICS,
        icon: "cpu",
        operating_system: WINDOWS,
        title: "System Up/Down Status",
        queries: &[TemplateQuery {
            id: "windows-uptime",
            query: "count(windows_os_info) or vector(0)",
            units: "",
            resolution: 0,
            alias: "System Status",
        }],
    },
    PanelTemplate {
        id: "windows-network-bandwidth",
        name: "Network Bandwidth",
        description: "Total bytes received and sent across all interfaces",
        category: NETWORK,
        icon: "network",
        operating_system: WINDOWS,
        title: "Network Bandwidth",
        queries: &[TemplateQuery {
            id: "windows-network-total",
            query: "sum by (instance) (rate(windows_net_bytes_total[1m]))",
            units: "bytes/s",
            resolution: 2,
            alias: "Network Bandwidth",
        }],
    },
    PanelTemplate {
        id: "prometheus-query-rate",
        name: "Prometheus Query Rate",
        description: "Rate of Prometheus queries per second",
        category: PROMETHEUS_METRICS,
        icon: "cpu",
        operating_system: OBSERVABILITY_NODE,
        title: "Prometheus Query Rate",
        queries: &[TemplateQuery {
            id: "prometheus-query-rate",
            query: "rate(prometheus_http_requests_total[5m])",
            units: "req/s",
            resolution: 2,
            alias: "Query Rate",
        }],
    },
    PanelTemplate {
        id: "prometheus-scrape-duration",
        name: "Scrape Duration",
        description: "Time taken to scrape targets",
        category: PROMETHEUS_METRICS,
        icon: "storage",
        operating_system: OBSERVABILITY_NODE,
        title: "Scrape Duration",
        queries: &[TemplateQuery {
            id: "prometheus-scrape-duration",
            query: "prometheus_target_interval_length_seconds",
            units: "s",
            resolution: 3,
            alias: "Scrape Duration",
        }],
    },
    PanelTemplate {
        id: "prometheus-targets-up",
        name: "Targets Up/Down",
        description: "Number of targets that are up",
        category: PROMETHEUS_METRICS,
        icon: "network",
        operating_system: OBSERVABILITY_NODE,
        title: "Targets Up/Down",
        queries: &[TemplateQuery {
            id: "prometheus-targets-up",
            query: "up",
            units: "",
            resolution: 0,
            alias: "Target Status",
        }],
    },
    PanelTemplate {
        id: "custom-panel-linux",
        name: "Custom Panel",
        description: BLANK_DESCRIPTION,
        category: CUSTOM,
        icon: "add",
        operating_system: LINUX,
        title: "New Panel",
        queries: &[],
    },
    PanelTemplate {
        id: "custom-panel-windows",
        name: "Custom Panel",
        description: BLANK_DESCRIPTION,
        category: CUSTOM,
        icon: "add",
        operating_system: WINDOWS,
        title: "New Panel",
        queries: &[],
    },
    PanelTemplate {
        id: "custom-panel-prometheus",
        name: "Custom Panel",
        description: BLANK_DESCRIPTION,
        category: CUSTOM,
        icon: "add",
        operating_system: OBSERVABILITY_NODE,
        title: "New Panel",
        queries: &[],
    },
];

pub fn all_templates() -> &'static [PanelTemplate] {
    TEMPLATES
}

pub fn template_by_id(id: &str) -> Option<&'static PanelTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

/// Category name that matches every template.
pub const ALL_CATEGORIES: &str = "All";

/// Templates for an operating system (compared case-insensitively) within a
/// category. `None` leaves that dimension unfiltered.
pub fn find_templates(operating_system: Option<&str>, category: Option<&str>) -> Vec<&'static PanelTemplate> {
    all_templates()
        .iter()
        .filter(|t| operating_system.is_none_or(|os| t.operating_system.eq_ignore_ascii_case(os)))
        .filter(|t| category.is_none_or(|c| c == ALL_CATEGORIES || t.category == c))
        .collect()
}

/// Distinct categories in catalogue order.
pub fn categories() -> Vec<&'static str> {
    let mut seen = Vec::new();
    for template in TEMPLATES {
        if !seen.contains(&template.category) {
            seen.push(template.category);
        }
    }
    seen
}
