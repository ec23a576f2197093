use anyhow::{Context, Result};
use kafka_cli_common::ClientFactory;
use tracing::info;

use crate::args::{AdminCommand, ConfigCommand, GroupsCommand, TopicsCommand};

pub async fn run(factory: &ClientFactory, command: AdminCommand) -> Result<()> {
    let admin = factory
        .admin()
        .await
        .context("unable to prepare an admin client")?;

    match command {
        AdminCommand::Config(ConfigCommand::Metadata) => {
            let cluster = admin
                .cluster_metadata()
                .await
                .context("unable to retrieve cluster metadata")?;
            for broker in &cluster.brokers {
                info!(id = broker.id, host = %broker.host, port = broker.port, "Broker");
            }
        }
        AdminCommand::Config(ConfigCommand::Params) => {
            let params = admin
                .broker_params()
                .await
                .context("unable to retrieve config parameters")?;
            for param in params {
                info!(
                    name = %param.name,
                    value = param.value.as_deref().unwrap_or(""),
                    default = param.is_default,
                    "Config parameter"
                );
            }
        }
        AdminCommand::Topics(TopicsCommand::Create {
            topic,
            partitions,
            replicas,
        }) => admin
            .create_topic(&topic, partitions, replicas)
            .await
            .with_context(|| format!("unable to create topic {topic}"))?,
        AdminCommand::Topics(TopicsCommand::Delete { topic }) => admin
            .delete_topic(&topic)
            .await
            .with_context(|| format!("unable to delete topic {topic}"))?,
        AdminCommand::Topics(TopicsCommand::Describe { topic }) => {
            let params = admin
                .describe_topic(&topic)
                .await
                .with_context(|| format!("unable to retrieve config of topic {topic}"))?;
            for param in params {
                info!(
                    topic = %topic,
                    name = %param.name,
                    value = param.value.as_deref().unwrap_or(""),
                    "Topic config"
                );
            }
        }
        AdminCommand::Topics(TopicsCommand::List) => {
            let topics = admin
                .list_topics()
                .await
                .context("unable to list topics")?;
            for topic in topics {
                info!(
                    name = %topic.name,
                    partitions = topic.partitions,
                    replicas = topic.replicas,
                    "Topic"
                );
            }
        }
        AdminCommand::Groups(GroupsCommand::List) => {
            let groups = admin
                .list_groups()
                .await
                .context("unable to list groups")?;
            for group in groups {
                info!(id = %group.name, state = %group.state, "Group");
            }
        }
        AdminCommand::Groups(GroupsCommand::Describe { group }) => {
            let summary = admin
                .describe_group(&group)
                .await
                .with_context(|| format!("unable to describe group {group}"))?;
            info!(
                id = %summary.name,
                state = %summary.state,
                protocol_type = %summary.protocol_type,
                members = summary.members.len(),
                "Group"
            );
            for member in &summary.members {
                info!(
                    group = %summary.name,
                    id = %member.id,
                    client_id = %member.client_id,
                    host = %member.client_host,
                    "Group member"
                );
            }
        }
        AdminCommand::Groups(GroupsCommand::Delete { group }) => admin
            .delete_group(&group)
            .await
            .with_context(|| format!("unable to delete group {group}"))?,
    }

    Ok(())
}
