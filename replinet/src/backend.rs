//! Backend driver selection.

use replinet_channel::ChannelBackend;
use replinet_protocol::{Backend, BackendError, BackendUrl};
use replinet_tcp::{GCOMM_DEFAULT_PORT, SPREAD_DEFAULT_PORT, TcpBackend};

use crate::Error;

/// Instantiates the driver named by a `"TYPE://ADDRESS"` URL.
///
/// Recognized schemes: `dummy` (in-process, address ignored), `spread` and
/// `gcomm` (TCP to an external daemon). The driver is bound but not joined;
/// joining happens at [`Connection::open`].
///
/// [`Connection::open`]: crate::Connection::open
pub(crate) fn create(url: &str) -> Result<Box<dyn Backend>, Error> {
    let parsed = BackendUrl::parse(url).map_err(Error::Backend)?;
    match parsed.scheme {
        "dummy" => Ok(Box::new(ChannelBackend::new())),
        "spread" => Ok(Box::new(TcpBackend::new(parsed.address, SPREAD_DEFAULT_PORT))),
        "gcomm" => Ok(Box::new(TcpBackend::new(parsed.address, GCOMM_DEFAULT_PORT))),
        scheme => Err(Error::Backend(BackendError::UnknownScheme {
            scheme: scheme.to_owned(),
        })),
    }
}
