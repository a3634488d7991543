//! Command line arguments and config file structure for `wgmesh-node`

use cfg_if::cfg_if;

pub mod node;

// Used to trick the build process into including a CLI argument based on a feature flag
cfg_if! {
    if #[cfg(feature = "profiler")] {
        #[derive(Debug, clap::Args)]
        pub struct ProfilerArgs {
            /// Expose the puffin HTTP server on this endpoint
            #[clap(long)]
            pub puffin_endpoint: Option<std::net::SocketAddr>,
        }
    } else {
        #[derive(Debug, clap::Args)]
        pub struct ProfilerArgs;
    }
}
