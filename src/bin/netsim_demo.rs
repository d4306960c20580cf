//! Command-line demo harness: build one of a handful of canned topologies
//! and run the event loop, printing what happened.

use std::cell::RefCell;
use std::rc::Rc;

use clap::{Parser, ValueEnum};

use netsim::addr::{Ipv4Addr, MacAddr};
use netsim::engine::Engine;
use netsim::host::Host;
use netsim::hub::Hub;
use netsim::bridge::Bridge;
use netsim::medium::Cable;
use netsim::ip::route::Route;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Scenario {
    /// Two hosts on one cable, one ping-shaped exchange.
    DirectLink,
    /// Three hosts sharing a hub.
    SharedHub,
    /// Two segments joined by a learning bridge.
    LearningBridge,
    /// Same segment on both bridge ports: the drop quirk fires.
    BridgeSameSegment,
    /// Two subnets joined by a router host with two interfaces.
    RoutedSubnets,
    /// Payload large enough to force IP fragmentation end to end.
    Fragmentation,
}

#[derive(Parser)]
#[command(author, version, about = "Run a canned network simulation scenario")]
struct Args {
    #[arg(value_enum)]
    scenario: Scenario,

    /// How far to advance the simulation clock, in nanoseconds.
    #[arg(long, default_value_t = 50_000_000)]
    run_until_ns: u64,
}

fn mac(last: u8) -> MacAddr {
    MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, last])
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let mut engine = Engine::new();

    match args.scenario {
        Scenario::DirectLink => {
            let host_a = Host::new("host-a");
            let host_b = Host::new("host-b");
            Host::add_interface(&host_a, &mut engine, "eth0", mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0), None);
            Host::add_interface(&host_b, &mut engine, "eth0", mac(2), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(255, 255, 255, 0), None);
            let cable = Cable::new("link", 10.0, 1.0e7, 1.0, false).unwrap();
            Host::attach_interface(&host_a, "eth0", &cable, 0.0).unwrap();
            Host::attach_interface(&host_b, "eth0", &cable, 10.0).unwrap();

            Host::output(&host_a, &mut engine, "eth0", Ipv4Addr::new(10, 0, 0, 2), b"hello from host-a");
        }

        Scenario::SharedHub => {
            let hub = Hub::new(3, &mut engine);
            let hosts: Vec<_> = (0..3)
                .map(|i| {
                    let host = Host::new(format!("host-{i}"));
                    Host::add_interface(&host, &mut engine, "eth0", mac(i as u8 + 1), Ipv4Addr::new(10, 0, 0, i as u8 + 1), Ipv4Addr::new(255, 255, 255, 0), None);
                    let cable = Cable::new(format!("seg-{i}"), 5.0, 1.0e7, 1.0, false).unwrap();
                    Hub::attach(&hub, i, &cable, 0.0).unwrap();
                    Host::attach_interface(&host, "eth0", &cable, 5.0).unwrap();
                    host
                })
                .collect();

            Host::output(&hosts[0], &mut engine, "eth0", Ipv4Addr::new(10, 0, 0, 3), b"broadcast-domain hello");
        }

        Scenario::LearningBridge => {
            let bridge = Bridge::new(2, 1_000, &mut engine);
            let host_a = Host::new("host-a");
            let host_b = Host::new("host-b");
            Host::add_interface(&host_a, &mut engine, "eth0", mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0), None);
            Host::add_interface(&host_b, &mut engine, "eth0", mac(2), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(255, 255, 255, 0), None);

            let cable_a = Cable::new("seg-a", 5.0, 1.0e7, 1.0, false).unwrap();
            Bridge::attach(&bridge, 0, &cable_a, 0.0).unwrap();
            Host::attach_interface(&host_a, "eth0", &cable_a, 5.0).unwrap();

            let cable_b = Cable::new("seg-b", 5.0, 1.0e7, 1.0, false).unwrap();
            Bridge::attach(&bridge, 1, &cable_b, 0.0).unwrap();
            Host::attach_interface(&host_b, "eth0", &cable_b, 5.0).unwrap();

            Host::output(&host_a, &mut engine, "eth0", Ipv4Addr::new(10, 0, 0, 2), b"across the bridge");
        }

        Scenario::BridgeSameSegment => {
            let bridge = Bridge::new(2, 1_000, &mut engine);
            let host_a = Host::new("host-a");
            let host_b = Host::new("host-b");
            Host::add_interface(&host_a, &mut engine, "eth0", mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0), None);
            Host::add_interface(&host_b, &mut engine, "eth0", mac(2), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(255, 255, 255, 0), None);

            // Both hosts wired to the bridge's port 0: once both are
            // learned there, traffic between them is dropped rather than
            // looped back out the port it arrived on.
            let cable = Cable::new("seg-shared", 10.0, 1.0e7, 1.0, false).unwrap();
            Bridge::attach(&bridge, 0, &cable, 0.0).unwrap();
            Host::attach_interface(&host_a, "eth0", &cable, 3.0).unwrap();
            Host::attach_interface(&host_b, "eth0", &cable, 7.0).unwrap();

            Host::output(&host_a, &mut engine, "eth0", Ipv4Addr::new(10, 0, 0, 2), b"same segment, never crosses the bridge");
        }

        Scenario::RoutedSubnets => {
            let router = Host::new("router");
            Host::add_interface(&router, &mut engine, "eth0", mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0), None);
            Host::add_interface(&router, &mut engine, "eth1", mac(2), Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(255, 255, 255, 0), None);

            let host_a = Host::new("host-a");
            Host::add_interface(&host_a, &mut engine, "eth0", mac(3), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(255, 255, 255, 0), Some(Ipv4Addr::new(10, 0, 0, 1)));
            let host_b = Host::new("host-b");
            Host::add_interface(&host_b, &mut engine, "eth0", mac(4), Ipv4Addr::new(10, 0, 1, 2), Ipv4Addr::new(255, 255, 255, 0), Some(Ipv4Addr::new(10, 0, 1, 1)));

            let cable_a = Cable::new("lan-a", 5.0, 1.0e7, 1.0, false).unwrap();
            Host::attach_interface(&router, "eth0", &cable_a, 0.0).unwrap();
            Host::attach_interface(&host_a, "eth0", &cable_a, 5.0).unwrap();

            let cable_b = Cable::new("lan-b", 5.0, 1.0e7, 1.0, false).unwrap();
            Host::attach_interface(&router, "eth1", &cable_b, 0.0).unwrap();
            Host::attach_interface(&host_b, "eth0", &cable_b, 5.0).unwrap();

            router.borrow_mut().add_route(Route {
                destination: Ipv4Addr::new(10, 0, 0, 0),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: None,
                interface_name: "eth0".into(),
                metric: 0,
            });
            router.borrow_mut().add_route(Route {
                destination: Ipv4Addr::new(10, 0, 1, 0),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: None,
                interface_name: "eth1".into(),
                metric: 0,
            });

            Host::output(&host_a, &mut engine, "eth0", Ipv4Addr::new(10, 0, 1, 2), b"cross-subnet hello, routed");
        }

        Scenario::Fragmentation => {
            let host_a = Host::new("host-a");
            let host_b = Host::new("host-b");
            Host::add_interface(&host_a, &mut engine, "eth0", mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0), None);
            Host::add_interface(&host_b, &mut engine, "eth0", mac(2), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(255, 255, 255, 0), None);
            host_a.borrow_mut().interfaces["eth0"].borrow_mut().mtu = 100;
            host_b.borrow_mut().interfaces["eth0"].borrow_mut().mtu = 100;

            let cable = Cable::new("link", 10.0, 1.0e7, 1.0, false).unwrap();
            Host::attach_interface(&host_a, "eth0", &cable, 0.0).unwrap();
            Host::attach_interface(&host_b, "eth0", &cable, 10.0).unwrap();

            let payload = vec![0xAB; 4000];
            Host::output(&host_a, &mut engine, "eth0", Ipv4Addr::new(10, 0, 0, 2), &payload);
        }
    }

    engine.run_until(args.run_until_ns);
    println!("simulation advanced to t={} ns", engine.now());
}
