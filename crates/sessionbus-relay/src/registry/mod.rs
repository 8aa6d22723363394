mod session;

pub use session::SessionRegistry;
