//! 预言机管理模块
//!
//! 将交易市场桥接到外部乐观预言机：按指标维护配置与授权请求方，
//! 负责数据请求簿记与历史值存储。解析是异步的（可能耗时数小时），
//! 因此请求与结算是两个独立的原子操作，系统内部不阻塞等待。

pub mod manager;
pub mod metric_registry;
pub mod resolution;

pub use manager::{DataRequest, OracleManager, RequestStatus};
pub use metric_registry::{MetricConfig, MetricRegistry};
pub use resolution::{OracleResolutionService, ResolutionState, SimulatedResolutionService};
