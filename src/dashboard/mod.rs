//! Dashboard assembly, alert ring and subscriber fan-out

pub mod publisher;
pub mod render;

pub use publisher::{DashboardPublisher, SubscriptionHandle};
pub use render::{render_dashboard, render_health_summary};
