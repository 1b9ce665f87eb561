use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover tables exposing the watermark column and seed their state
    Seed,

    /// Make sure every tracked table has a destination, reporting schema drift
    Provision,

    /// Run extraction cycles
    Run {
        #[arg(long, help = "Run a single cycle and exit")]
        once: bool,

        #[arg(long, help = "Build and log jobs without moving data or advancing watermarks")]
        dry_run: bool,
    },

    /// Show tracked tables and their watermarks
    State {
        #[arg(long, help = "Only show tables of this source")]
        source: Option<u32>,

        #[arg(
            long,
            help = "If set, prints the state as JSON lines instead of a table"
        )]
        json: bool,
    },

    /// Test a Postgres connection string
    TestConn {
        /// Connection string
        #[arg(long)]
        conn_str: String,
    },
}
