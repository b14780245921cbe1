//! 订单簿协作方模块
//!
//! 按价格排序的档位结构，提供最优买卖价查询。价格-时间优先的撮合遍历
//! 不在本系统范围内：成交执行前的数量归并由订单簿协作方自行解决。

pub mod book;

pub use book::{LevelBook, OrderBook};
