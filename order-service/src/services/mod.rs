pub mod database;
pub mod order_flow;
pub mod razorpay;
pub mod repository;

pub use database::Database;
pub use order_flow::OrderFlowService;
pub use razorpay::RazorpayClient;
pub use repository::OrderRepository;
