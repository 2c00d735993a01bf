//! Chart walking: rendering, traversal and the typed manifest view

pub mod walker;
pub mod workload;

pub use walker::{
    chart_dir_name, copy_chart, is_local_chart, pull_chart, render_to_dir, render_to_string,
    template_files,
};
pub use workload::{to_yaml, Container, Manifest, Workload, WorkloadKind};
