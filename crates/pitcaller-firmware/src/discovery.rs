//! Address and name services for browser clients
//!
//! While the device hosts its fallback access point nothing else on the link
//! hands out addresses, so [`dhcp_server_task`] leases them from the AP
//! subnet. [`mdns_task`] runs in both modes and answers `<hostname>.local`
//! with the device address.

use core::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};

use edge_dhcp::io::{self as dhcp_io, DEFAULT_SERVER_PORT};
use edge_dhcp::server::{Server, ServerOptions};
use edge_mdns::HostAnswersMdnsHandler;
use edge_mdns::buf::VecBufAccess;
use edge_mdns::domain::base::Ttl;
use edge_mdns::host::Host;
use edge_mdns::io as mdns_io;
use edge_nal::{UdpBind, UdpSplit};
use edge_nal_embassy::{Udp, UdpBuffers};
use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use esp_hal::rng::Rng;
use log::{info, warn};

const MDNS_PORT: u16 = 5353;
const DATAGRAM_LEN: usize = 1500;

/// Leases the access point can hand out at once
const MAX_LEASES: usize = 16;

/// How long resolvers may cache the `.local` answer
const MDNS_TTL_SECS: u32 = 120;

/// Pause before a failed service binds its socket again
const RETRY_DELAY: Duration = Duration::from_secs(1);

type ServiceBuffers = UdpBuffers<1, DATAGRAM_LEN, DATAGRAM_LEN, 2>;

/// DHCP server for clients of the fallback access point.
///
/// `address` is the device address on the AP subnet; it is also handed out as
/// the gateway so clients route the UI requests to the device.
#[embassy_executor::task]
pub async fn dhcp_server_task(stack: Stack<'static>, address: Ipv4Addr) -> ! {
    let buffers = ServiceBuffers::new();
    let udp = Udp::new(stack, &buffers);
    let mut packet = [0u8; DATAGRAM_LEN];
    let mut gateways = [Ipv4Addr::UNSPECIFIED];
    let bind_to = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_SERVER_PORT));

    loop {
        match udp.bind(bind_to).await {
            Ok(mut socket) => {
                info!("DHCP server leasing addresses next to {}", address);
                let result = dhcp_io::server::run(
                    &mut Server::<_, MAX_LEASES>::new_with_et(address),
                    &ServerOptions::new(address, Some(&mut gateways)),
                    &mut socket,
                    &mut packet,
                )
                .await;
                if let Err(e) = result {
                    warn!("DHCP server stopped: {:?}", e);
                }
            }
            Err(e) => warn!("Failed to bind DHCP server socket: {:?}", e),
        }
        Timer::after(RETRY_DELAY).await;
    }
}

/// mDNS responder answering `<hostname>.local` with `address`
#[embassy_executor::task]
pub async fn mdns_task(stack: Stack<'static>, hostname: &'static str, address: Ipv4Addr) -> ! {
    let buffers = ServiceBuffers::new();
    let udp = Udp::new(stack, &buffers);
    let host = Host {
        hostname,
        ipv4: address,
        ipv6: Ipv6Addr::UNSPECIFIED,
        ttl: Ttl::from_secs(MDNS_TTL_SECS),
    };
    let bind_to = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT));

    loop {
        match mdns_io::bind(&udp, bind_to, Some(Ipv4Addr::UNSPECIFIED), None).await {
            Ok(mut socket) => {
                info!("Answering mDNS queries for {}.local", hostname);
                let (recv, send) = socket.split();
                let broadcast = Signal::new();
                let mdns = mdns_io::Mdns::<NoopRawMutex, _, _, _, _>::new(
                    Some(Ipv4Addr::UNSPECIFIED),
                    None,
                    recv,
                    send,
                    VecBufAccess::<NoopRawMutex, DATAGRAM_LEN>::new(),
                    VecBufAccess::<NoopRawMutex, DATAGRAM_LEN>::new(),
                    |buf| Rng::new().read(buf),
                    &broadcast,
                );
                if let Err(e) = mdns.run(HostAnswersMdnsHandler::new(&host)).await {
                    warn!("mDNS responder stopped: {:?}", e);
                }
            }
            Err(e) => warn!("Failed to bind mDNS socket: {:?}", e),
        }
        Timer::after(RETRY_DELAY).await;
    }
}
