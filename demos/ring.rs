use collective_comm_demo::message::envelope::Payload;
use collective_comm_demo::message::tcp::TcpTransport;
use collective_comm_demo::{Communicator, RequestSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::ops::Range;
use std::thread;

const TAG: i32 = 0;

fn main() {
    let ranks: Range<usize> = 0..8;
    let listeners: Vec<_> = ranks
        .clone()
        .map(|_| TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap())
        .collect();
    let peers: Vec<_> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();

    let procs: Vec<_> = ranks
        .zip(listeners)
        .map(|(rank, listener)| {
            let transport = TcpTransport::from_listener(rank, peers.clone(), listener).unwrap();
            thread::spawn(move || {
                let comm = Communicator::new(transport).unwrap();
                let world = comm.world();
                let message = (comm.rank() * 100) as Payload;
                let mut received: Payload = -1;

                let mut requests = RequestSet::new();
                requests.push(comm.irecv(&mut received, world.left(), TAG).unwrap());
                requests.push(comm.isend(&message, world.right(), TAG).unwrap());
                requests.wait_all().unwrap();

                println!("{} received {} from {}", comm.rank(), received, world.left());
                comm.barrier().unwrap();
                comm.into_transport().flush().unwrap();
            })
        })
        .collect();

    for process in procs {
        process.join().unwrap()
    }
}
