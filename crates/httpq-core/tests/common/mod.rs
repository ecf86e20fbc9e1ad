pub mod tracker_server;
