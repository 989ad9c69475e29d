use std::sync::Arc;

use anyhow::{anyhow, ensure, Context};
use zbus::fdo::{self, RequestNameFlags, RequestNameReply};
use zbus::{dbus_interface, MessageHeader};

use crate::bridge::Bridge;
use crate::registry::{Owner, RequestError};
use crate::shutdown::InboundEndpoint;

pub const NAME: &str = "org.freedesktop.ScreenSaver";
pub const PATH: &str = "/org/freedesktop/ScreenSaver";
// Firefox looks for this path, not /org/freedesktop/ScreenSaver.
pub const LEGACY_PATH: &str = "/ScreenSaver";

#[derive(Clone)]
pub struct ScreenSaver {
    bridge: Arc<Bridge>,
}

#[dbus_interface(name = "org.freedesktop.ScreenSaver")]
impl ScreenSaver {
    async fn inhibit(
        &self,
        #[zbus(header)] hdr: MessageHeader<'_>,
        application_name: &str,
        reason_for_inhibit: &str,
    ) -> fdo::Result<u32> {
        trace!(
            "fdo inhibit, app: `{application_name}`, reason: `{reason_for_inhibit}`, owner: {:?}",
            hdr.sender()
        );

        let owner = sender(&hdr)?;
        self.bridge
            .inhibit(owner, application_name, reason_for_inhibit)
            .map_err(to_fdo_error)
    }

    async fn un_inhibit(
        &self,
        #[zbus(header)] hdr: MessageHeader<'_>,
        cookie: u32,
    ) -> fdo::Result<()> {
        trace!("fdo uninhibit, cookie: {cookie}, owner: {:?}", hdr.sender());

        let owner = sender(&hdr)?;
        self.bridge.un_inhibit(&owner, cookie).map_err(to_fdo_error)
    }
}

impl ScreenSaver {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

fn sender(hdr: &MessageHeader<'_>) -> fdo::Result<Owner> {
    match hdr.sender() {
        Ok(Some(name)) => Ok(Owner::peer(name.as_str())),
        _ => Err(fdo::Error::Failed(String::from("no sender"))),
    }
}

pub fn to_fdo_error(err: RequestError) -> fdo::Error {
    match err {
        RequestError::PermissionDenied { .. } => fdo::Error::AccessDenied(err.to_string()),
        err => fdo::Error::Failed(format!("{err:#}")),
    }
}

/// The ScreenSaver service exported on the session bus.
pub struct ScreenSaverEndpoint {
    conn: zbus::blocking::Connection,
}

impl ScreenSaverEndpoint {
    /// Exports the interface on both paths and claims the well-known name.
    ///
    /// Fails if another process already owns the name.
    pub fn start(bridge: Arc<Bridge>) -> anyhow::Result<Self> {
        let conn =
            zbus::blocking::Connection::session().context("error connecting to the session bus")?;

        let iface = ScreenSaver::new(bridge);
        for path in [PATH, LEGACY_PATH] {
            conn.object_server()
                .at(path, iface.clone())
                .with_context(|| format!("error exporting {NAME} at {path}"))?;
        }

        let reply = conn
            .request_name_with_flags(NAME, RequestNameFlags::DoNotQueue.into())
            .with_context(|| format!("error requesting {NAME}"))?;
        ensure!(
            matches!(
                reply,
                RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner
            ),
            "{NAME} is already owned by another process ({reply:?})"
        );

        debug!("serving {NAME} at {PATH} and {LEGACY_PATH}");
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &zbus::blocking::Connection {
        &self.conn
    }
}

impl InboundEndpoint for ScreenSaverEndpoint {
    fn detach(&mut self) -> anyhow::Result<()> {
        // Every step runs even if an earlier one failed, so that a name we couldn't release
        // doesn't leave the interface exported.
        let results = [
            self.conn
                .release_name(NAME)
                .map(drop)
                .with_context(|| format!("error releasing {NAME}")),
            unexport(&self.conn, PATH),
            unexport(&self.conn, LEGACY_PATH),
        ];

        collect_errors(results)
    }
}

fn unexport(conn: &zbus::blocking::Connection, path: &str) -> anyhow::Result<()> {
    conn.object_server()
        .remove::<ScreenSaver, _>(path)
        .map(drop)
        .with_context(|| format!("error removing {NAME} from {path}"))
}

fn collect_errors(results: impl IntoIterator<Item = anyhow::Result<()>>) -> anyhow::Result<()> {
    let errors: Vec<String> = results
        .into_iter()
        .filter_map(Result::err)
        .map(|err| format!("{err:#}"))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_map_to_dbus_errors() {
        let denied = to_fdo_error(RequestError::PermissionDenied {
            cookie: 7,
            owner: Owner::peer(":1.3"),
        });
        assert!(matches!(denied, fdo::Error::AccessDenied(msg) if msg.contains(":1.3")));

        let missing = to_fdo_error(RequestError::NotFound(7));
        assert!(matches!(missing, fdo::Error::Failed(msg) if msg == "7 is an invalid cookie"));

        let acquire = to_fdo_error(RequestError::AcquisitionFailed(anyhow::anyhow!("no logind")));
        assert!(matches!(acquire, fdo::Error::Failed(msg) if msg.contains("no logind")));
    }

    #[test]
    fn detach_errors_are_collected() {
        assert!(collect_errors([Ok(()), Ok(()), Ok(())]).is_ok());

        let err = collect_errors([
            Err(anyhow!("error releasing {NAME}")),
            Ok(()),
            Err(anyhow!("error removing {NAME} from {LEGACY_PATH}")),
        ])
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("error releasing"));
        assert!(msg.contains(LEGACY_PATH));
    }
}
