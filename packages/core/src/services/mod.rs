pub mod ad_manager;
pub mod google_auth;
pub mod mailer;
pub mod mock_ad_manager;
pub mod remote_config;
