use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP daemon
    Daemon {
        /// Address to listen on, overrides `listen_addr` from config
        #[clap(long)]
        addr: Option<String>,
    },

    /// Map candidate tags onto the canonical vocabulary,
    /// admitting the ones that are new
    Reconcile {
        /// Candidate tags, comma or argument separated
        #[clap(required = true, num_args = 1..)]
        tags: Vec<String>,
    },

    /// List the canonical vocabulary
    Tags {},

    /// Print the cosine similarity of two strings
    Similarity {
        /// First string
        a: String,

        /// Second string
        b: String,
    },
}
