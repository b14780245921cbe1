//! 领域类型模块
//!
//! 订单（成交单元）与持仓（抵押品支持的结算单元）

pub mod order;
pub mod position;

pub use order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use position::{Position, PositionDirection};
