//! Shared fixtures for unit tests

use crate::drift::{DriftDetector, DriftPolicy};
use crate::guard::CoordinationView;
use crate::inspector::ClusterSnapshot;
use crate::plan::PlanInput;
use crate::render::{tests::image, unit_name, DefaultRenderer, RenderInput};
use chrono::Utc;
use dbop_types::{
    ConditionType, DeploymentId, DeploymentMode, DeploymentSpec, DeploymentStatus, Member,
    MemberId, MemberList, MemberPhase, RuntimeUnit, ServerGroup,
};

pub(crate) static RENDERER: DefaultRenderer = DefaultRenderer;

/// A deployment whose members all run their rendered configuration
pub(crate) struct Fixture {
    pub id: DeploymentId,
    pub name: String,
    pub spec: DeploymentSpec,
    pub status: DeploymentStatus,
    pub snapshot: ClusterSnapshot,
    pub policy: DriftPolicy,
}

impl Fixture {
    /// Three agents, three dbservers and three coordinators, all ready.
    pub fn cluster() -> Self {
        let mut members = MemberList::new();
        for group in [
            ServerGroup::Agents,
            ServerGroup::DbServers,
            ServerGroup::Coordinators,
        ] {
            for i in 0..3 {
                let id = MemberId::new(format!("{}-{i}", group.policy().id_prefix));
                let mut member = Member::new(id, Utc::now());
                member.phase = MemberPhase::Created;
                member
                    .conditions
                    .update(ConditionType::Ready, true, None, None, Utc::now());
                members.add(member, group).unwrap();
            }
        }
        let mut status = DeploymentStatus {
            members,
            current_image: Some(image()),
            ..DeploymentStatus::default()
        };
        status.images.add_or_update(image());

        let mut fixture = Self {
            id: DeploymentId::generate(),
            name: "demo".into(),
            spec: DeploymentSpec::new(DeploymentMode::Cluster, "db:3.10"),
            status,
            snapshot: ClusterSnapshot::new(),
            policy: DriftPolicy::default(),
        };
        fixture.settle();
        fixture
    }

    /// Record the current rendering of every member and run it.
    pub fn settle(&mut self) {
        let detector = DriftDetector::new(&RENDERER, &self.policy);
        let image = image();
        let mut rendered = Vec::new();
        for (group, member) in self.status.members.iter() {
            let (spec, fp) = detector
                .render(&RenderInput {
                    deployment_id: &self.id,
                    deployment_name: &self.name,
                    spec: &self.spec,
                    status: &self.status,
                    group,
                    member,
                    image: &image,
                })
                .unwrap();
            rendered.push((group, member.id.clone(), spec, fp));
        }

        self.snapshot = ClusterSnapshot::new();
        for (group, id, spec, fp) in rendered {
            let name = unit_name(&self.name, group, &id);
            let uid = format!("uid-{}", id);
            let (_, member) = self.status.members.element_by_id_mut(&id).unwrap();
            member.fingerprint = Some(fp);
            member.runtime_unit = Some(name.clone());
            member.runtime_uid = Some(uid.clone());
            member.image = Some(image.clone());
            self.snapshot = std::mem::take(&mut self.snapshot).with_runtime_unit(RuntimeUnit {
                name,
                uid,
                member_id: id,
                group,
                labels: spec.labels.clone(),
                finalizers: spec.finalizers.clone(),
                spec,
                ready: true,
                terminating: false,
            });
        }
    }

    pub fn member(&self, id: &str) -> &Member {
        self.status
            .members
            .element_by_id(&MemberId::new(id))
            .unwrap()
            .1
    }

    pub fn member_mut(&mut self, id: &str) -> &mut Member {
        self.status
            .members
            .element_by_id_mut(&MemberId::new(id))
            .unwrap()
            .1
    }

    pub fn input<'a>(&'a self, coordination: &'a CoordinationView) -> PlanInput<'a> {
        PlanInput {
            deployment_id: &self.id,
            deployment_name: &self.name,
            spec: &self.spec,
            status: &self.status,
            inspector: &self.snapshot,
            coordination,
            drift: DriftDetector::new(&RENDERER, &self.policy),
            now: Utc::now(),
        }
    }
}
