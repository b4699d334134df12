//! 协议帧
//!
//! 每个帧是一个字节块：1字节操作码加载荷。控制帧（PING/INIT/CLOSE及
//! 其应答）在任何批次交换之前即可识别；TASK/RESULT的载荷是编解码管线
//! 的输出，协议层不做解释。

use simnet_core::{SimnetError, SimnetResult};

const OP_PING: u8 = 0x01;
const OP_INIT: u8 = 0x02;
const OP_TASK: u8 = 0x03;
const OP_CLOSE: u8 = 0x04;

const OP_PONG: u8 = 0x81;
const OP_INIT_OK: u8 = 0x82;
const OP_RESULT: u8 = 0x83;
const OP_CLOSE_OK: u8 = 0x84;

/// Master发往Worker的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterFrame {
    /// 存活探测
    Ping,
    /// 安装共享模型上下文，制品内容不透明
    Init { model: String, artifact: Vec<u8> },
    /// 编码压缩后的任务批次
    Task(Vec<u8>),
    /// 会话终止，释放缓存的模型
    Close { model: String },
}

/// Worker发往Master的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerFrame {
    Pong,
    InitOk,
    /// 编码压缩后的结果批次
    Result(Vec<u8>),
    CloseOk,
}

fn encode_name(buf: &mut Vec<u8>, name: &str) -> SimnetResult<()> {
    let bytes = name.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(SimnetError::Protocol(format!(
            "模型名称过长: {} 字节",
            bytes.len()
        )));
    }
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn decode_name(bytes: &[u8]) -> SimnetResult<(String, &[u8])> {
    if bytes.len() < 2 {
        return Err(SimnetError::Protocol("帧载荷过短".to_string()));
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    if bytes.len() < 2 + len {
        return Err(SimnetError::Protocol("模型名称字段被截断".to_string()));
    }
    let name = String::from_utf8(bytes[2..2 + len].to_vec())
        .map_err(|e| SimnetError::Protocol(format!("模型名称非UTF-8: {e}")))?;
    Ok((name, &bytes[2 + len..]))
}

impl MasterFrame {
    pub fn encode(&self) -> SimnetResult<Vec<u8>> {
        match self {
            MasterFrame::Ping => Ok(vec![OP_PING]),
            MasterFrame::Init { model, artifact } => {
                let mut buf = vec![OP_INIT];
                encode_name(&mut buf, model)?;
                buf.extend_from_slice(artifact);
                Ok(buf)
            }
            MasterFrame::Task(payload) => {
                let mut buf = Vec::with_capacity(1 + payload.len());
                buf.push(OP_TASK);
                buf.extend_from_slice(payload);
                Ok(buf)
            }
            MasterFrame::Close { model } => {
                let mut buf = vec![OP_CLOSE];
                encode_name(&mut buf, model)?;
                Ok(buf)
            }
        }
    }

    pub fn decode(block: &[u8]) -> SimnetResult<Self> {
        let (&opcode, payload) = block
            .split_first()
            .ok_or_else(|| SimnetError::Protocol("空帧".to_string()))?;
        match opcode {
            OP_PING => Ok(MasterFrame::Ping),
            OP_INIT => {
                let (model, rest) = decode_name(payload)?;
                Ok(MasterFrame::Init {
                    model,
                    artifact: rest.to_vec(),
                })
            }
            OP_TASK => Ok(MasterFrame::Task(payload.to_vec())),
            OP_CLOSE => {
                let (model, rest) = decode_name(payload)?;
                if !rest.is_empty() {
                    return Err(SimnetError::Protocol("CLOSE帧存在尾随字节".to_string()));
                }
                Ok(MasterFrame::Close { model })
            }
            other => Err(SimnetError::Protocol(format!(
                "未知的Master操作码: {other:#04x}"
            ))),
        }
    }
}

impl WorkerFrame {
    pub fn encode(&self) -> SimnetResult<Vec<u8>> {
        match self {
            WorkerFrame::Pong => Ok(vec![OP_PONG]),
            WorkerFrame::InitOk => Ok(vec![OP_INIT_OK]),
            WorkerFrame::Result(payload) => {
                let mut buf = Vec::with_capacity(1 + payload.len());
                buf.push(OP_RESULT);
                buf.extend_from_slice(payload);
                Ok(buf)
            }
            WorkerFrame::CloseOk => Ok(vec![OP_CLOSE_OK]),
        }
    }

    pub fn decode(block: &[u8]) -> SimnetResult<Self> {
        let (&opcode, payload) = block
            .split_first()
            .ok_or_else(|| SimnetError::Protocol("空帧".to_string()))?;
        match opcode {
            OP_PONG if payload.is_empty() => Ok(WorkerFrame::Pong),
            OP_INIT_OK if payload.is_empty() => Ok(WorkerFrame::InitOk),
            OP_RESULT => Ok(WorkerFrame::Result(payload.to_vec())),
            OP_CLOSE_OK if payload.is_empty() => Ok(WorkerFrame::CloseOk),
            other => Err(SimnetError::Protocol(format!(
                "未知的Worker操作码: {other:#04x}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_frame_round_trip() {
        let frames = vec![
            MasterFrame::Ping,
            MasterFrame::Init {
                model: "population".to_string(),
                artifact: vec![1, 2, 3, 4],
            },
            MasterFrame::Task(vec![9, 8, 7]),
            MasterFrame::Close {
                model: "population".to_string(),
            },
        ];
        for frame in frames {
            let decoded = MasterFrame::decode(&frame.encode().unwrap()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_worker_frame_round_trip() {
        let frames = vec![
            WorkerFrame::Pong,
            WorkerFrame::InitOk,
            WorkerFrame::Result(vec![0; 128]),
            WorkerFrame::CloseOk,
        ];
        for frame in frames {
            let decoded = WorkerFrame::decode(&frame.encode().unwrap()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_empty_artifact_allowed() {
        let frame = MasterFrame::Init {
            model: "m".to_string(),
            artifact: vec![],
        };
        assert_eq!(MasterFrame::decode(&frame.encode().unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(MasterFrame::decode(&[0x7f]).is_err());
        assert!(WorkerFrame::decode(&[0x7f]).is_err());
        assert!(MasterFrame::decode(&[]).is_err());
    }

    #[test]
    fn test_truncated_init_rejected() {
        let frame = MasterFrame::Init {
            model: "population".to_string(),
            artifact: vec![],
        };
        let encoded = frame.encode().unwrap();
        assert!(MasterFrame::decode(&encoded[..3]).is_err());
    }

    #[test]
    fn test_control_frames_with_payload_rejected() {
        assert!(WorkerFrame::decode(&[0x81, 0x00]).is_err());
        assert!(WorkerFrame::decode(&[0x82, 0x00]).is_err());
    }
}
