#[cfg(feature = "gmail")]
pub mod gmail;
#[cfg(feature = "google_photos")]
pub mod google_photos;
#[cfg(feature = "spotify")]
pub mod spotify;

#[cfg(feature = "gmail")]
pub use gmail::GmailConnector;
#[cfg(feature = "google_photos")]
pub use google_photos::GooglePhotosConnector;
#[cfg(feature = "spotify")]
pub use spotify::SpotifyConnector;
