use crate::error::NetError;
use crate::sizebuf::SizeBuf;

use super::control::ControlMessage;
use super::datagram::DatagramDriver;
use super::driver::NetContext;
use super::hostcache::{HOST_NAME_LEN, HostCacheEntry, truncate};
use super::protocol::{GAME_NAME, NET_DATAGRAMSIZE, NET_MAXMESSAGE, NET_PROTOCOL_VERSION};
use super::udp::{AddrMatch, addr_compare, addr_to_string};

impl DatagramDriver {
    /// Broadcasts a server info request when `xmit` is set, then caches
    /// every reply waiting on the control socket.
    pub(crate) fn search(&mut self, ctx: &mut NetContext, xmit: bool) -> Result<(), NetError> {
        let level = self.level;
        let Some(udp) = self.udp.as_mut() else {
            return Ok(());
        };
        if ctx.host_cache.is_full() {
            return Ok(());
        }
        let control = udp.control_socket();

        if xmit {
            let mut request = SizeBuf::alloc(NET_DATAGRAMSIZE);
            ControlMessage::ServerInfo {
                game: GAME_NAME.to_string(),
                version: NET_PROTOCOL_VERSION,
            }
            .encode(&mut request)?;
            match udp.broadcast(control, request.data()) {
                Ok(_) => {}
                Err(NetError::Io(e)) => log::debug!("server info broadcast failed: {}", e),
                Err(e) => return Err(e),
            }
        }

        let my_addr = udp.socket_addr(control)?;
        let mut buf = vec![0u8; NET_MAXMESSAGE];
        while let Ok(Some((len, from))) = udp.read(control, &mut buf) {
            if addr_compare(&from, &my_addr) == AddrMatch::Same {
                continue;
            }
            if ctx.host_cache.is_full() {
                continue;
            }
            let Some(ControlMessage::ServerInfoReply(info)) = ControlMessage::decode(&buf[..len])
            else {
                continue;
            };

            let addr = if info.address.is_empty() {
                from
            } else {
                udp.addr_from_name(&info.address).unwrap_or(from)
            };
            if ctx.host_cache.contains_addr(&addr) {
                continue;
            }

            let name = if info.protocol_version == NET_PROTOCOL_VERSION {
                info.host_name
            } else {
                format!("*{}", truncate(&info.host_name, HOST_NAME_LEN - 1))
            };
            log::debug!("found server {} at {}", name, addr);
            ctx.host_cache.insert(HostCacheEntry {
                name,
                map: info.level_name,
                cname: addr_to_string(&addr),
                users: info.current_players,
                max_users: info.max_players,
                driver: level,
                addr,
            });
        }
        Ok(())
    }
}
