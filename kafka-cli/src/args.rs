use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
/// CLI tools to work with Kafka.
///
/// Connection and security settings come from KAFKA_* environment variables (or a .env
/// file): PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL with SCRAM, or AWS_MSK_IAM.
#[command(name = "kafka-cli", version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Administer the cluster
    #[command(subcommand)]
    Admin(AdminCommand),

    /// Produce messages to a topic
    Produce {
        topic: String,

        /// Payload to send; joined with spaces. Without one, generated messages are sent.
        payload: Vec<String>,

        /// Number of generated messages to send (ignored when a payload is given)
        #[arg(short, long, default_value_t = 1)]
        iterations: usize,
    },

    /// Consume messages from a topic until interrupted
    Consume {
        topic: String,

        /// Consumer group ID. If blank, no group is joined and offsets are not committed.
        #[arg(long, value_name = "GROUP")]
        groupid: Option<String>,

        /// How each message is written to stdout
        #[arg(long, value_enum, default_value_t = OutputFormat::Raw)]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Work with cluster config
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Work with topics
    #[command(subcommand)]
    Topics(TopicsCommand),

    /// Work with consumer groups
    #[command(subcommand)]
    Groups(GroupsCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Retrieve cluster metadata
    Metadata,
    /// Retrieve broker config params
    Params,
}

#[derive(Subcommand, Debug)]
pub enum TopicsCommand {
    /// Create a topic
    Create {
        topic: String,

        /// Number of partitions for the new topic
        #[arg(short, long, default_value_t = 1)]
        partitions: i32,

        /// Number of replicas for the new topic
        #[arg(short, long, default_value_t = 1)]
        replicas: i32,
    },
    /// Delete a topic
    Delete { topic: String },
    /// Describe a topic's configuration
    Describe { topic: String },
    /// List topics
    List,
}

#[derive(Subcommand, Debug)]
pub enum GroupsCommand {
    /// List groups
    List,
    /// Describe a group
    Describe { group: String },
    /// Delete a group
    Delete { group: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// The payload as text
    Raw,
    /// One JSON object per message, with metadata
    Json,
}
