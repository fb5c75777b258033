//! Generated proxy for RAUC's `de.pengutronix.rauc.Installer` interface.
//!
//! The interface and its well-known bus name/path are RAUC's, not ours;
//! the driver only consumes `InstallBundle`, the three properties and the
//! `Completed` signal.

#[zbus::proxy(
    interface = "de.pengutronix.rauc.Installer",
    default_service = "de.pengutronix.rauc",
    default_path = "/"
)]
pub trait Installer {
    /// `args` carries `http-headers`, `tls-no-verify`, `tls-key`,
    /// `tls-cert` for a streamed install; empty for a local path.
    fn install_bundle(
        &self,
        source: &str,
        args: std::collections::HashMap<&str, zbus::zvariant::Value<'_>>,
    ) -> zbus::Result<()>;

    #[zbus(property)]
    fn operation(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn progress(&self) -> zbus::Result<(i32, String, i32)>;

    #[zbus(property)]
    fn last_error(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn completed(&self, nexit_status: i32) -> zbus::Result<()>;
}
